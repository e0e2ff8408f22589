use sqlpump_protocol::messages::ErrorFields;
use thiserror::Error;

/// An ErrorResponse reported by the server for one statement.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{severity} {code}: {message}")]
pub struct ServerError {
    pub severity: String,
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
}

impl From<ErrorFields> for ServerError {
    fn from(fields: ErrorFields) -> Self {
        Self {
            severity: fields.severity,
            code: fields.code,
            message: fields.message,
            detail: fields.detail,
            hint: fields.hint,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStatus {
    Rows,
    Command,
    Empty,
    Error,
}

/// The outcome of one statement, in text format.
///
/// A server-side error is still a result; use [`PgResult::into_result`] to
/// turn it into an `Err`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PgResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
    pub command_tag: Option<String>,
    pub error: Option<ServerError>,
}

impl PgResult {
    pub fn with_columns(columns: Vec<String>) -> Self {
        Self {
            columns,
            ..Self::default()
        }
    }

    pub fn from_error(error: ServerError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn status(&self) -> ResultStatus {
        if self.error.is_some() {
            ResultStatus::Error
        } else if !self.columns.is_empty() {
            ResultStatus::Rows
        } else if self.command_tag.is_some() {
            ResultStatus::Command
        } else {
            ResultStatus::Empty
        }
    }

    /// Row count from the command tag, e.g. 3 for `UPDATE 3` or `INSERT 0 3`.
    pub fn rows_affected(&self) -> Option<u64> {
        self.command_tag
            .as_deref()?
            .rsplit(' ')
            .next()
            .and_then(|count| count.parse().ok())
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&str> {
        let index = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row)?.get(index)?.as_deref()
    }

    pub fn into_result(mut self) -> Result<Self, ServerError> {
        match self.error.take() {
            Some(error) => Err(error),
            None => Ok(self),
        }
    }
}
