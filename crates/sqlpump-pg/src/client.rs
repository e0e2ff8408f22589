use crate::driver::Request;
use crate::result::{PgResult, ServerError};
use sqlpump_core::{QueryError, QueryId, SubmitError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("query rejected: {0}")]
    Submit(#[from] SubmitError),
    #[error("query failed: {0}")]
    Query(#[from] QueryError),
    #[error("server error: {0}")]
    Server(ServerError),
    #[error("connection closed")]
    Closed,
}

/// Handle to a connection's driver task. Clones share the same connection
/// and their queries are serialized in the order the driver receives them.
#[derive(Debug, Clone)]
pub struct Client {
    requests: mpsc::Sender<Request>,
}

/// A query accepted by the connection, waiting for its result.
#[derive(Debug)]
pub struct PendingQuery {
    id: QueryId,
    reply: oneshot::Receiver<Result<PgResult, QueryError>>,
}

impl Client {
    pub(crate) fn new(requests: mpsc::Sender<Request>) -> Self {
        Self { requests }
    }

    /// Queues `sql` on the connection. Resolves once the connection has
    /// accepted or rejected it, not when it finishes.
    pub async fn submit(&self, sql: impl Into<String>) -> Result<PendingQuery, ClientError> {
        let (accepted_tx, accepted_rx) = oneshot::channel();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(Request::Query {
                sql: sql.into(),
                accepted: accepted_tx,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ClientError::Closed)?;
        let id = accepted_rx.await.map_err(|_| ClientError::Closed)??;
        Ok(PendingQuery {
            id,
            reply: reply_rx,
        })
    }

    pub async fn query(&self, sql: impl Into<String>) -> Result<PgResult, ClientError> {
        self.submit(sql).await?.wait().await
    }

    /// Runs a statement and returns the row count from its command tag.
    pub async fn execute(&self, sql: impl Into<String>) -> Result<u64, ClientError> {
        Ok(self.query(sql).await?.rows_affected().unwrap_or(0))
    }

    /// Asks the driver to finish the queries it already holds and then
    /// terminate the session.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.requests
            .send(Request::Close)
            .await
            .map_err(|_| ClientError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }
}

impl PendingQuery {
    pub fn id(&self) -> QueryId {
        self.id
    }

    /// Waits for the statement to finish. Server-side errors come back as
    /// [`ClientError::Server`].
    pub async fn wait(self) -> Result<PgResult, ClientError> {
        let outcome = self.reply.await.map_err(|_| ClientError::Closed)?;
        outcome?.into_result().map_err(ClientError::Server)
    }
}
