//! The task that owns one PostgreSQL session.
//!
//! A single task holds the socket and the [`Connection`]: client requests and
//! socket reads are multiplexed with `select!`, so every state transition runs
//! on that task and nothing needs a lock.

use crate::client::Client;
use crate::config::{ClientOptions, PgConfig};
use crate::engine::PgEngine;
use crate::result::PgResult;
use anyhow::{anyhow, Context, Result};
use sqlpump_core::{Connection, QueryError, QueryId, SubmitError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

#[derive(Debug)]
pub(crate) enum Request {
    Query {
        sql: String,
        accepted: oneshot::Sender<Result<QueryId, SubmitError>>,
        reply: oneshot::Sender<Result<PgResult, QueryError>>,
    },
    Close,
}

/// Opens a connection and spawns its driver on the current tokio runtime.
///
/// Returns as soon as the task is spawned; queries submitted before the
/// session is ready wait in the connection's queue. The join handle resolves
/// to `Ok` after a clean close and to the fatal error otherwise.
pub fn connect(config: PgConfig, options: ClientOptions) -> Result<(Client, JoinHandle<Result<()>>)> {
    let address = config.address();
    let (fatal_tx, fatal_rx) = oneshot::channel();
    let connection = Connection::<PgEngine>::open(config, move |cause| {
        let _ = fatal_tx.send(cause);
    })?;
    let (tx, rx) = mpsc::channel(options.request_capacity.max(1));
    let driver = Driver {
        address,
        requests: rx,
        fatal: fatal_rx,
        closing: false,
    };
    let handle = tokio::spawn(driver.run(connection));
    Ok((Client::new(tx), handle))
}

struct Driver {
    address: String,
    requests: mpsc::Receiver<Request>,
    fatal: oneshot::Receiver<anyhow::Error>,
    closing: bool,
}

impl Driver {
    async fn run(mut self, mut connection: Connection<PgEngine>) -> Result<()> {
        // Requests are served while the socket connects; they queue behind
        // the `Connect` state like any other submission made before ready.
        let connecting = TcpStream::connect(self.address.clone());
        tokio::pin!(connecting);
        let mut stream = loop {
            tokio::select! {
                connected = &mut connecting => match connected {
                    Ok(stream) => break stream,
                    Err(err) => {
                        let cause = anyhow!(err).context(format!("connect to {}", self.address));
                        return Err(self.tear_down(connection, cause));
                    }
                },
                request = self.requests.recv(), if !self.closing => {
                    self.on_request(&mut connection, request);
                }
            }
        };
        let _ = stream.set_nodelay(true);
        info!(address = %self.address, pending = connection.pending(), "socket connected");

        loop {
            let outbound = connection.engine_mut().take_outbound();
            if !outbound.is_empty() {
                if let Err(err) = stream.write_all(&outbound).await {
                    return Err(self.tear_down(connection, anyhow!(err).context("write to server")));
                }
            }
            if self.closing && connection.pending() == 0 {
                return self.finish(connection, stream).await;
            }

            tokio::select! {
                read = stream.read_buf(connection.engine_mut().inbound_mut()) => {
                    match read {
                        Ok(0) => {
                            return Err(self.tear_down(connection, anyhow!("server closed the connection")));
                        }
                        Ok(_) => {
                            while let Some(event) = connection.engine_mut().next_event() {
                                connection = match connection.handle_event(event) {
                                    Some(connection) => connection,
                                    None => return Err(self.fatal_cause()),
                                };
                            }
                        }
                        Err(err) => {
                            return Err(self.tear_down(connection, anyhow!(err).context("read from server")));
                        }
                    }
                }
                request = self.requests.recv(), if !self.closing => {
                    self.on_request(&mut connection, request);
                }
            }
        }
    }

    fn on_request(&mut self, connection: &mut Connection<PgEngine>, request: Option<Request>) {
        match request {
            Some(Request::Query { sql, accepted, reply }) => {
                submit(connection, &sql, accepted, reply);
            }
            Some(Request::Close) | None => {
                debug!(pending = connection.pending(), "close requested");
                self.closing = true;
            }
        }
    }

    /// Routes a failure through the connection's teardown and returns the
    /// cause as reported to the fatal-error callback.
    fn tear_down(&mut self, mut connection: Connection<PgEngine>, cause: anyhow::Error) -> anyhow::Error {
        let event = connection.engine_mut().fail(cause);
        if connection.handle_event(event).is_some() {
            error!("connection survived a fatal failure");
        }
        self.fatal_cause()
    }

    fn fatal_cause(&mut self) -> anyhow::Error {
        self.fatal
            .try_recv()
            .unwrap_or_else(|_| anyhow!("connection torn down"))
    }

    async fn finish(&mut self, connection: Connection<PgEngine>, mut stream: TcpStream) -> Result<()> {
        let mut engine = connection.shutdown();
        engine.terminate();
        let outbound = engine.take_outbound();
        stream
            .write_all(&outbound)
            .await
            .context("write terminate")?;
        let _ = stream.shutdown().await;
        info!(address = %self.address, "connection closed");
        Ok(())
    }
}

fn submit(
    connection: &mut Connection<PgEngine>,
    sql: &str,
    accepted: oneshot::Sender<Result<QueryId, SubmitError>>,
    reply: oneshot::Sender<Result<PgResult, QueryError>>,
) {
    // A queued statement the engine cannot send would fail in the pump with
    // no later event to restart it, stalling everything behind it.
    if let Err(err) = PgEngine::check_statement(sql) {
        debug!(error = %err, "statement refused before queueing");
        let _ = accepted.send(Err(SubmitError::Execute(err)));
        return;
    }
    let outcome = connection.submit(sql, move |completion| {
        let _ = reply.send(completion.outcome);
    });
    let _ = accepted.send(outcome);
}
