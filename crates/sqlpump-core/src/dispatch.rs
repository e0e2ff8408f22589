use crate::engine::{Engine, EngineEvent};
use crate::error::{QueryError, SubmitError};
use crate::types::{QueryId, Readiness};
use metrics::counter;
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, error, warn};

pub type CompletionFn<E> = Box<dyn for<'a> FnOnce(Completion<'a, E>) + Send>;
pub type FatalFn = Box<dyn FnOnce(anyhow::Error) + Send>;

/// What a completion callback receives.
///
/// The connection is handed back mutably so callbacks can submit follow-up
/// queries. The query has already left the queue at this point.
pub struct Completion<'a, E: Engine> {
    pub connection: &'a mut Connection<E>,
    pub query: QueryId,
    pub outcome: Result<E::Payload, QueryError>,
}

impl<E: Engine> Completion<'_, E> {
    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }
}

struct Query<E: Engine> {
    id: QueryId,
    /// `Some` until handed to the engine.
    command: Option<String>,
    on_complete: CompletionFn<E>,
    result: Option<E::Payload>,
}

impl<E: Engine> Query<E> {
    fn is_active(&self) -> bool {
        self.command.is_none()
    }
}

/// One logical database connection: an engine plus the FIFO of queries
/// waiting on it.
///
/// Only the head of the queue is ever executing, and the next head is only
/// started once the current one has completed, so completions fire in
/// submission order.
pub struct Connection<E: Engine> {
    engine: E,
    queue: VecDeque<Query<E>>,
    on_fatal: FatalFn,
    next_id: u64,
    closing: bool,
}

impl<E: Engine> Connection<E> {
    /// Connects a new engine. `on_fatal` runs once, after every pending query
    /// has been failed, if the engine later reports a fatal failure.
    pub fn open<F>(params: E::Params, on_fatal: F) -> anyhow::Result<Self>
    where
        F: FnOnce(anyhow::Error) + Send + 'static,
    {
        let engine = E::connect(params)?;
        Ok(Self::with_engine(engine, on_fatal))
    }

    pub fn with_engine<F>(engine: E, on_fatal: F) -> Self
    where
        F: FnOnce(anyhow::Error) + Send + 'static,
    {
        Self {
            engine,
            queue: VecDeque::new(),
            on_fatal: Box::new(on_fatal),
            next_id: 1,
            closing: false,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn readiness(&self) -> Readiness {
        self.engine.readiness()
    }

    /// Queries submitted and not yet completed, including the active one.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// The query currently executing on the engine, if any.
    pub fn in_flight(&self) -> Option<QueryId> {
        self.queue
            .front()
            .filter(|query| query.is_active())
            .map(|query| query.id)
    }

    /// Queues `command`, executing it right away when the engine is idle.
    ///
    /// `on_complete` is called exactly once unless this returns an error, in
    /// which case nothing was queued and it is dropped uncalled.
    pub fn submit<F>(&mut self, command: &str, on_complete: F) -> Result<QueryId, SubmitError>
    where
        F: for<'a> FnOnce(Completion<'a, E>) + Send + 'static,
    {
        if self.closing {
            counter!("sqlpump_query_rejected_total").increment(1);
            return Err(SubmitError::Closing);
        }
        let command = match self.engine.readiness() {
            Readiness::Failed => {
                counter!("sqlpump_query_rejected_total").increment(1);
                return Err(SubmitError::ConnectionFailed);
            }
            // From inside a completion callback the engine is idle while
            // deferred queries still wait for the pump; those go first.
            Readiness::Idle if self.queue.is_empty() => {
                if let Err(err) = self.engine.execute(command) {
                    counter!("sqlpump_query_rejected_total").increment(1);
                    return Err(SubmitError::Execute(err));
                }
                None
            }
            Readiness::Idle | Readiness::Busy => Some(command.to_owned()),
        };
        let id = QueryId::new(self.next_id);
        self.next_id += 1;
        debug!(query = %id, deferred = command.is_some(), "query submitted");
        self.queue.push_back(Query {
            id,
            command,
            on_complete: Box::new(on_complete),
            result: None,
        });
        counter!("sqlpump_query_submitted_total").increment(1);
        Ok(id)
    }

    /// Feeds one engine event through the state machine.
    ///
    /// Returns `None` once a fatal failure has torn the connection down.
    pub fn handle_event(mut self, event: EngineEvent<E::Payload>) -> Option<Self> {
        match event {
            EngineEvent::Connected => self.on_connected(),
            EngineEvent::ResultReceived(payload) => self.on_result(payload),
            EngineEvent::StatementDone => self.on_statement_done(),
            EngineEvent::FatalFailure(cause) => {
                self.on_fatal_failure(cause);
                return None;
            }
        }
        Some(self)
    }

    pub fn on_connected(&mut self) {
        debug!(pending = self.queue.len(), "engine connected");
        self.pump();
    }

    /// Retains `payload` on the active query. Only the first result of a
    /// statement is kept.
    pub fn on_result(&mut self, payload: E::Payload) {
        self.expect_active_head("result");
        if let Some(head) = self.queue.front_mut() {
            if head.result.is_some() {
                warn!(query = %head.id, "statement returned multiple results, discarding the extra one");
                return;
            }
            head.result = Some(payload);
        }
    }

    pub fn on_statement_done(&mut self) {
        self.expect_active_head("statement done");
        let Some(mut query) = self.queue.pop_front() else {
            return;
        };
        let outcome = match query.result.take() {
            Some(payload) => Ok(payload),
            None => {
                warn!(query = %query.id, "statement finished without returning a result");
                Err(QueryError::NoResult)
            }
        };
        self.finish(query, outcome);
        self.pump();
    }

    /// Fails every queued query, then reports `cause` to the fatal-error
    /// callback. The connection is gone afterwards.
    pub fn on_fatal_failure(mut self, cause: anyhow::Error) {
        error!(pending = self.queue.len(), error = %cause, "connection failed, tearing down");
        counter!("sqlpump_connection_teardown_total").increment(1);
        self.drain(QueryError::ConnectionLost);
        (self.on_fatal)(cause);
    }

    /// Closes the connection without a fatal error. Queries still queued are
    /// failed with [`QueryError::Shutdown`]; the engine is handed back so the
    /// caller can say goodbye on the wire.
    pub fn shutdown(mut self) -> E {
        debug!(pending = self.queue.len(), "connection shutting down");
        self.drain(QueryError::Shutdown);
        self.engine
    }

    fn pump(&mut self) {
        let Some(head) = self.queue.front_mut() else {
            return;
        };
        let Some(command) = head.command.take() else {
            return;
        };
        let id = head.id;
        match self.engine.execute(&command) {
            Ok(()) => debug!(query = %id, "query dispatched"),
            Err(err) => {
                // The next head waits for the next engine event.
                warn!(query = %id, error = %err, "engine rejected queued statement");
                if let Some(query) = self.queue.pop_front() {
                    self.finish(query, Err(QueryError::Execute(err.to_string())));
                }
            }
        }
    }

    fn drain(&mut self, error: QueryError) {
        self.closing = true;
        while let Some(query) = self.queue.pop_front() {
            self.finish(query, Err(error.clone()));
        }
    }

    fn finish(&mut self, query: Query<E>, outcome: Result<E::Payload, QueryError>) {
        match &outcome {
            Ok(_) => counter!("sqlpump_query_completed_total").increment(1),
            Err(_) => counter!("sqlpump_query_failed_total").increment(1),
        }
        debug!(query = %query.id, error = outcome.is_err(), "query completed");
        (query.on_complete)(Completion {
            connection: self,
            query: query.id,
            outcome,
        });
    }

    fn expect_active_head(&self, event: &str) {
        match self.queue.front() {
            Some(head) if head.is_active() => {}
            Some(head) => panic!("{event} event for query {} that was never executed", head.id),
            None => panic!("{event} event with no query in flight"),
        }
    }
}

impl<E: Engine + fmt::Debug> fmt::Debug for Connection<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("engine", &self.engine)
            .field("pending", &self.queue.len())
            .field("in_flight", &self.in_flight())
            .field("closing", &self.closing)
            .finish()
    }
}
