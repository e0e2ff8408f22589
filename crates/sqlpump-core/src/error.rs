use thiserror::Error;

/// Why a submission was refused. No query is queued when this is returned.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("connection has failed")]
    ConnectionFailed,
    #[error("connection is closing")]
    Closing,
    #[error("engine rejected statement: {0}")]
    Execute(anyhow::Error),
}

/// Delivered to a completion callback when a query did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("engine rejected statement: {0}")]
    Execute(String),
    #[error("statement finished without a result")]
    NoResult,
    #[error("connection lost")]
    ConnectionLost,
    #[error("connection shut down")]
    Shutdown,
}
