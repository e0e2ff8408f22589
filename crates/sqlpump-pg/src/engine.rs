//! PostgreSQL backend engine.
//!
//! `PgEngine` does no IO of its own: the driver feeds it bytes read from the
//! socket and writes out whatever it has queued. Everything it learns from the
//! server comes back one [`EngineEvent`] at a time from [`PgEngine::next_event`].

use crate::config::PgConfig;
use crate::result::{PgResult, ServerError};
use anyhow::{anyhow, bail, ensure, Result};
use bytes::BytesMut;
use md5::{Digest, Md5};
use sqlpump_core::{Engine, EngineEvent, Readiness};
use sqlpump_protocol::backend::decode_backend;
use sqlpump_protocol::frontend::{check_text, encode_frontend};
use sqlpump_protocol::messages::{BackendMessage, FrontendMessage, TransactionState};
use std::collections::HashMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgState {
    /// Created, startup not sent yet.
    Init,
    /// Startup sent, waiting for the first ReadyForQuery.
    Connect,
    Connected,
    /// A simple query is in flight.
    Query,
    Failure,
}

impl From<PgState> for Readiness {
    fn from(state: PgState) -> Self {
        match state {
            PgState::Connect | PgState::Query => Readiness::Busy,
            PgState::Connected => Readiness::Idle,
            PgState::Init | PgState::Failure => Readiness::Failed,
        }
    }
}

#[derive(Debug)]
pub struct PgEngine {
    config: PgConfig,
    state: PgState,
    inbound: BytesMut,
    outbound: BytesMut,
    /// Result set being assembled from RowDescription/DataRow.
    partial: Option<PgResult>,
    server_params: HashMap<String, String>,
    backend_key: Option<(i32, i32)>,
    transaction: TransactionState,
}

impl PgEngine {
    pub fn new(config: PgConfig) -> Self {
        Self {
            config,
            state: PgState::Init,
            inbound: BytesMut::with_capacity(8 * 1024),
            outbound: BytesMut::new(),
            partial: None,
            server_params: HashMap::new(),
            backend_key: None,
            transaction: TransactionState::Idle,
        }
    }

    /// Queues the StartupMessage and moves to `Connect`.
    pub fn start(&mut self) -> Result<()> {
        ensure!(self.state == PgState::Init, "engine already started");
        self.config.validate()?;
        let params = self.config.startup_params();
        encode_frontend(&FrontendMessage::Startup { params }, &mut self.outbound)?;
        self.state = PgState::Connect;
        Ok(())
    }

    /// Buffer the driver reads socket data into.
    pub fn inbound_mut(&mut self) -> &mut BytesMut {
        &mut self.inbound
    }

    pub fn receive(&mut self, bytes: &[u8]) {
        self.inbound.extend_from_slice(bytes);
    }

    pub fn has_outbound(&self) -> bool {
        !self.outbound.is_empty()
    }

    pub fn take_outbound(&mut self) -> BytesMut {
        self.outbound.split()
    }

    pub fn server_param(&self, key: &str) -> Option<&str> {
        self.server_params.get(key).map(String::as_str)
    }

    pub fn backend_key(&self) -> Option<(i32, i32)> {
        self.backend_key
    }

    pub fn transaction_state(&self) -> TransactionState {
        self.transaction
    }

    /// Marks the engine failed, e.g. after a socket error, and returns the
    /// event to hand to the connection.
    pub fn fail(&mut self, cause: anyhow::Error) -> EngineEvent<PgResult> {
        self.state = PgState::Failure;
        self.partial = None;
        self.inbound.clear();
        EngineEvent::FatalFailure(cause)
    }

    /// Queues a Terminate message. The engine is unusable afterwards.
    pub fn terminate(&mut self) {
        if matches!(self.state, PgState::Connected | PgState::Query) {
            // Terminate has no payload, encoding cannot fail.
            let _ = encode_frontend(&FrontendMessage::Terminate, &mut self.outbound);
        }
        self.state = PgState::Failure;
    }

    /// Decodes buffered server messages until one produces an event.
    pub fn next_event(&mut self) -> Option<EngineEvent<PgResult>> {
        if self.state == PgState::Failure {
            return None;
        }
        loop {
            let message = match decode_backend(&mut self.inbound) {
                Ok(Some(message)) => message,
                Ok(None) => return None,
                Err(err) => return Some(self.fail(err.context("malformed server message"))),
            };
            match self.handle_message(message) {
                Ok(Some(event)) => return Some(event),
                Ok(None) => {}
                Err(err) => return Some(self.fail(err)),
            }
        }
    }

    fn handle_message(&mut self, message: BackendMessage) -> Result<Option<EngineEvent<PgResult>>> {
        match (self.state, message) {
            (PgState::Connect, BackendMessage::AuthenticationOk) => {
                debug!(user = %self.config.user, "authenticated");
                Ok(None)
            }
            (PgState::Connect, BackendMessage::AuthenticationCleartextPassword) => {
                let password = self.password()?.to_string();
                self.send(FrontendMessage::Password { password })?;
                Ok(None)
            }
            (PgState::Connect, BackendMessage::AuthenticationMd5Password { salt }) => {
                let password = md5_password(&self.config.user, self.password()?, &salt);
                self.send(FrontendMessage::Password { password })?;
                Ok(None)
            }
            (PgState::Connect, BackendMessage::AuthenticationSasl { mechanisms }) => {
                bail!(
                    "unsupported SASL authentication ({})",
                    mechanisms.join(", ")
                )
            }
            (PgState::Connect, BackendMessage::AuthenticationOther { code }) => {
                bail!("unsupported authentication request {code}")
            }
            (_, BackendMessage::ParameterStatus { key, value }) => {
                self.server_params.insert(key, value);
                Ok(None)
            }
            (_, BackendMessage::BackendKeyData { pid, secret }) => {
                self.backend_key = Some((pid, secret));
                Ok(None)
            }
            (_, BackendMessage::NoticeResponse { fields }) => {
                info!(severity = %fields.severity, code = %fields.code, "server notice: {}", fields.message);
                Ok(None)
            }
            (PgState::Connect, BackendMessage::ReadyForQuery { state }) => {
                self.transaction = state;
                self.state = PgState::Connected;
                info!(
                    server_version = self.server_param("server_version").unwrap_or("unknown"),
                    "connection ready"
                );
                Ok(Some(EngineEvent::Connected))
            }
            (PgState::Query, BackendMessage::ReadyForQuery { state }) => {
                self.transaction = state;
                self.state = PgState::Connected;
                if self.partial.take().is_some() {
                    warn!("result set ended without CommandComplete");
                }
                Ok(Some(EngineEvent::StatementDone))
            }
            (PgState::Query, BackendMessage::RowDescription { fields }) => {
                let columns = fields.into_iter().map(|field| field.name).collect();
                self.partial = Some(PgResult::with_columns(columns));
                Ok(None)
            }
            (PgState::Query, BackendMessage::DataRow { values }) => {
                let row = values
                    .into_iter()
                    .map(|value| value.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
                    .collect();
                self.partial.get_or_insert_with(PgResult::default).rows.push(row);
                Ok(None)
            }
            (PgState::Query, BackendMessage::CommandComplete { tag }) => {
                let mut result = self.partial.take().unwrap_or_default();
                result.command_tag = Some(tag);
                Ok(Some(EngineEvent::ResultReceived(result)))
            }
            (PgState::Query, BackendMessage::EmptyQueryResponse) => {
                self.partial = None;
                Ok(Some(EngineEvent::ResultReceived(PgResult::default())))
            }
            (PgState::Query, BackendMessage::ErrorResponse { fields }) => {
                self.partial = None;
                let error = ServerError::from(fields);
                debug!(code = %error.code, "statement failed on server");
                Ok(Some(EngineEvent::ResultReceived(PgResult::from_error(error))))
            }
            (_, BackendMessage::ErrorResponse { fields }) => {
                Err(anyhow!(ServerError::from(fields)).context("server closed the session"))
            }
            (_, BackendMessage::NotificationResponse { pid, channel, payload }) => {
                info!(pid, %channel, %payload, "notification");
                Ok(None)
            }
            // Nothing is streamed back, so the server fails the statement and
            // carries on with ErrorResponse and ReadyForQuery.
            (PgState::Query, BackendMessage::CopyInResponse) => {
                warn!("refusing COPY FROM STDIN");
                self.send(FrontendMessage::CopyFail {
                    message: "COPY FROM STDIN is not supported by this client".into(),
                })?;
                Ok(None)
            }
            // COPY TO STDOUT rows are skipped; the statement still completes
            // with its `COPY n` tag.
            (PgState::Query, BackendMessage::CopyOutResponse)
            | (PgState::Query, BackendMessage::CopyData { .. })
            | (PgState::Query, BackendMessage::CopyDone) => Ok(None),
            (_, BackendMessage::Unsupported { code }) => {
                bail!("unsupported server message '{}'", code as char)
            }
            (state, message) => bail!("unexpected {message:?} in state {state:?}"),
        }
    }

    /// Whether `sql` can be sent as a simple query at all. A statement that
    /// fails this check would fail `execute` whenever it is dispatched.
    pub fn check_statement(sql: &str) -> Result<()> {
        check_text(sql)
    }

    fn password(&self) -> Result<&str> {
        self.config
            .password
            .as_deref()
            .ok_or_else(|| anyhow!("server requested a password but none is configured"))
    }

    fn send(&mut self, message: FrontendMessage) -> Result<()> {
        encode_frontend(&message, &mut self.outbound)
    }
}

impl Engine for PgEngine {
    type Params = PgConfig;
    type State = PgState;
    type Payload = PgResult;

    fn connect(params: PgConfig) -> Result<Self> {
        let mut engine = Self::new(params);
        engine.start()?;
        Ok(engine)
    }

    fn state(&self) -> PgState {
        self.state
    }

    fn execute(&mut self, command: &str) -> Result<()> {
        ensure!(
            self.state == PgState::Connected,
            "cannot execute in state {:?}",
            self.state
        );
        Self::check_statement(command)?;
        self.send(FrontendMessage::Query {
            sql: command.to_string(),
        })?;
        self.state = PgState::Query;
        Ok(())
    }
}

/// `"md5" + md5(md5(password + user) + salt)`, both digests in lowercase hex.
pub(crate) fn md5_password(user: &str, password: &str, salt: &[u8; 4]) -> String {
    let mut inner = Md5::new();
    inner.update(password.as_bytes());
    inner.update(user.as_bytes());
    let inner_hex = format!("{:x}", inner.finalize());

    let mut outer = Md5::new();
    outer.update(inner_hex.as_bytes());
    outer.update(salt);
    format!("md5{:x}", outer.finalize())
}
