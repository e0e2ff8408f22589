use std::collections::HashMap;

/// Protocol version 3.0 as sent in the StartupMessage.
pub const PROTOCOL_VERSION: i32 = 196608;

#[derive(Debug, Clone, PartialEq)]
pub enum FrontendMessage {
    Startup { params: HashMap<String, String> },
    Query { sql: String },
    Password { password: String },
    /// Aborts a COPY FROM STDIN the server started.
    CopyFail { message: String },
    Terminate,
    Unsupported { code: u8 },
}

/// Where the session stands after a statement, as reported by the status
/// byte of ReadyForQuery. `Error` means statements are refused until the
/// client rolls back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    #[default]
    Idle,
    Transaction,
    Error,
}

impl TransactionState {
    pub fn wire_byte(self) -> u8 {
        match self {
            TransactionState::Idle => b'I',
            TransactionState::Transaction => b'T',
            TransactionState::Error => b'E',
        }
    }

    pub fn from_wire_byte(byte: u8) -> Option<Self> {
        match byte {
            b'I' => Some(TransactionState::Idle),
            b'T' => Some(TransactionState::Transaction),
            b'E' => Some(TransactionState::Error),
            _ => None,
        }
    }
}

/// A single field in a RowDescription (PostgreSQL wire protocol).
#[derive(Debug, Clone, PartialEq)]
pub struct RowDescriptionField {
    pub name: String,
    pub type_oid: i32,
}

impl RowDescriptionField {
    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_oid: 25,
        }
    }
}

/// The tagged fields of an ErrorResponse or NoticeResponse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorFields {
    pub severity: String,
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
}

impl ErrorFields {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: "ERROR".into(),
            code: code.into(),
            message: message.into(),
            detail: None,
            hint: None,
        }
    }

    /// Stores one `(tag, value)` pair; tags this crate does not model are ignored.
    pub fn set(&mut self, tag: u8, value: String) {
        match tag {
            b'S' => self.severity = value,
            b'C' => self.code = value,
            b'M' => self.message = value,
            b'D' => self.detail = Some(value),
            b'H' => self.hint = Some(value),
            _ => {}
        }
    }

    pub fn pairs(&self) -> Vec<(u8, &str)> {
        let mut pairs = vec![
            (b'S', self.severity.as_str()),
            (b'C', self.code.as_str()),
            (b'M', self.message.as_str()),
        ];
        if let Some(detail) = &self.detail {
            pairs.push((b'D', detail));
        }
        if let Some(hint) = &self.hint {
            pairs.push((b'H', hint));
        }
        pairs
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackendMessage {
    AuthenticationOk,
    AuthenticationCleartextPassword,
    AuthenticationMd5Password { salt: [u8; 4] },
    AuthenticationSasl { mechanisms: Vec<String> },
    AuthenticationOther { code: i32 },
    ParameterStatus { key: String, value: String },
    BackendKeyData { pid: i32, secret: i32 },
    ReadyForQuery { state: TransactionState },
    RowDescription { fields: Vec<RowDescriptionField> },
    DataRow { values: Vec<Option<Vec<u8>>> },
    CommandComplete { tag: String },
    EmptyQueryResponse,
    ErrorResponse { fields: ErrorFields },
    NoticeResponse { fields: ErrorFields },
    /// LISTEN/NOTIFY delivery; may arrive in any state.
    NotificationResponse { pid: i32, channel: String, payload: String },
    CopyInResponse,
    CopyOutResponse,
    CopyBothResponse,
    CopyData { data: Vec<u8> },
    CopyDone,
    Unsupported { code: u8 },
}
