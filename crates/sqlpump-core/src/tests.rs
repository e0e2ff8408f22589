#[cfg(test)]
mod tests {
    use crate::dispatch::{Completion, Connection};
    use crate::engine::{Engine, EngineEvent};
    use crate::error::{QueryError, SubmitError};
    use crate::types::Readiness;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum ScriptState {
        Init,
        Connecting,
        Ready,
        Running,
        Dead,
    }

    impl From<ScriptState> for Readiness {
        fn from(state: ScriptState) -> Self {
            match state {
                ScriptState::Connecting | ScriptState::Running => Readiness::Busy,
                ScriptState::Ready => Readiness::Idle,
                ScriptState::Init | ScriptState::Dead => Readiness::Failed,
            }
        }
    }

    /// Engine double: records what it was asked to run and rejects any
    /// command starting with "bad".
    #[derive(Debug)]
    struct ScriptedEngine {
        state: ScriptState,
        executed: Vec<String>,
    }

    impl Engine for ScriptedEngine {
        type Params = ScriptState;
        type State = ScriptState;
        type Payload = Arc<String>;

        fn connect(params: ScriptState) -> anyhow::Result<Self> {
            Ok(Self {
                state: params,
                executed: Vec::new(),
            })
        }

        fn state(&self) -> ScriptState {
            self.state
        }

        fn execute(&mut self, command: &str) -> anyhow::Result<()> {
            assert_eq!(
                self.state,
                ScriptState::Ready,
                "statement sent while the engine was not ready"
            );
            if command.starts_with("bad") {
                return Err(anyhow!("syntax error in {command}"));
            }
            self.executed.push(command.to_string());
            self.state = ScriptState::Running;
            Ok(())
        }
    }

    type Log = Arc<Mutex<Vec<(String, Result<String, QueryError>)>>>;

    struct Harness {
        log: Log,
        fatal: Arc<Mutex<Vec<String>>>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                log: Arc::new(Mutex::new(Vec::new())),
                fatal: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn open(&self, state: ScriptState) -> Connection<ScriptedEngine> {
            let fatal = self.fatal.clone();
            let log = self.log.clone();
            Connection::open(state, move |cause| {
                let completed = log.lock().unwrap().len();
                fatal
                    .lock()
                    .unwrap()
                    .push(format!("{cause} after {completed} completions"));
            })
            .expect("open")
        }

        fn submit(
            &self,
            conn: &mut Connection<ScriptedEngine>,
            label: &str,
        ) -> Result<crate::QueryId, SubmitError> {
            let log = self.log.clone();
            let owned = label.to_string();
            conn.submit(label, move |completion| record(&log, &owned, completion))
        }

        fn completions(&self) -> Vec<(String, Result<String, QueryError>)> {
            self.log.lock().unwrap().clone()
        }
    }

    fn record(log: &Log, label: &str, completion: Completion<'_, ScriptedEngine>) {
        let outcome = completion.outcome.map(|payload| payload.to_string());
        log.lock().unwrap().push((label.to_string(), outcome));
    }

    fn connected(conn: &mut Connection<ScriptedEngine>) {
        conn.engine_mut().state = ScriptState::Ready;
        conn.on_connected();
    }

    fn result(conn: &mut Connection<ScriptedEngine>, text: &str) {
        conn.on_result(Arc::new(text.to_string()));
    }

    fn done(conn: &mut Connection<ScriptedEngine>) {
        conn.engine_mut().state = ScriptState::Ready;
        conn.on_statement_done();
    }

    fn ok(label: &str, payload: &str) -> (String, Result<String, QueryError>) {
        (label.to_string(), Ok(payload.to_string()))
    }

    fn err(label: &str, error: QueryError) -> (String, Result<String, QueryError>) {
        (label.to_string(), Err(error))
    }

    #[test]
    fn deferred_queries_run_after_connect() {
        let h = Harness::new();
        let mut conn = h.open(ScriptState::Connecting);
        let q1 = h.submit(&mut conn, "select 1").expect("q1");
        let q2 = h.submit(&mut conn, "select 2").expect("q2");
        assert!(q1 < q2);
        assert_eq!(conn.pending(), 2);
        assert_eq!(conn.in_flight(), None);
        assert!(conn.engine().executed.is_empty());

        connected(&mut conn);
        assert_eq!(conn.engine().executed, vec!["select 1"]);
        assert_eq!(conn.in_flight(), Some(q1));

        result(&mut conn, "R1");
        done(&mut conn);
        assert_eq!(h.completions(), vec![ok("select 1", "R1")]);
        assert_eq!(conn.engine().executed, vec!["select 1", "select 2"]);
        assert_eq!(conn.in_flight(), Some(q2));

        done(&mut conn);
        assert_eq!(
            h.completions(),
            vec![ok("select 1", "R1"), err("select 2", QueryError::NoResult)]
        );
        assert_eq!(conn.pending(), 0);
    }

    #[test]
    fn idle_connection_executes_immediately() {
        let h = Harness::new();
        let mut conn = h.open(ScriptState::Ready);
        let q1 = h.submit(&mut conn, "select 1").expect("q1");
        assert_eq!(conn.engine().executed, vec!["select 1"]);
        assert_eq!(conn.in_flight(), Some(q1));
        assert_eq!(conn.readiness(), Readiness::Busy);

        result(&mut conn, "R1");
        done(&mut conn);
        assert_eq!(h.completions(), vec![ok("select 1", "R1")]);
        assert_eq!(conn.pending(), 0);
    }

    #[test]
    fn fatal_failure_fails_every_query_before_the_error_callback() {
        let h = Harness::new();
        let mut conn = h.open(ScriptState::Ready);
        h.submit(&mut conn, "q1").expect("q1");
        h.submit(&mut conn, "q2").expect("q2");
        h.submit(&mut conn, "q3").expect("q3");
        result(&mut conn, "partial");

        let conn = conn.handle_event(EngineEvent::FatalFailure(anyhow!("socket reset")));
        assert!(conn.is_none());
        assert_eq!(
            h.completions(),
            vec![
                err("q1", QueryError::ConnectionLost),
                err("q2", QueryError::ConnectionLost),
                err("q3", QueryError::ConnectionLost),
            ]
        );
        assert_eq!(
            *h.fatal.lock().unwrap(),
            vec!["socket reset after 3 completions".to_string()]
        );
    }

    #[test]
    fn completions_follow_submission_order() {
        let h = Harness::new();
        let mut conn = h.open(ScriptState::Connecting);
        let labels: Vec<String> = (0..16).map(|i| format!("select {i}")).collect();
        for label in &labels {
            h.submit(&mut conn, label).expect("submit");
        }
        connected(&mut conn);
        for i in 0..labels.len() {
            // Events arrive in varying shapes: with a result, with two, or bare.
            match i % 3 {
                0 => result(&mut conn, &format!("R{i}")),
                1 => {
                    result(&mut conn, &format!("R{i}"));
                    result(&mut conn, "extra");
                }
                _ => {}
            }
            assert!(conn.in_flight().is_some());
            done(&mut conn);
        }
        let completions = h.completions();
        let order: Vec<&str> = completions.iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(order, labels.iter().map(String::as_str).collect::<Vec<_>>());
        assert_eq!(conn.engine().executed, labels);
        assert_eq!(completions[2].1, Err(QueryError::NoResult));
        assert_eq!(completions[4].1, Ok("R4".to_string()));
    }

    #[test]
    fn extra_result_is_dropped_and_first_kept() {
        let h = Harness::new();
        let mut conn = h.open(ScriptState::Ready);
        h.submit(&mut conn, "select 1; select 2").expect("submit");
        let second = Arc::new("R2".to_string());
        result(&mut conn, "R1");
        conn.on_result(second.clone());
        assert_eq!(Arc::strong_count(&second), 1);
        done(&mut conn);
        assert_eq!(h.completions(), vec![ok("select 1; select 2", "R1")]);
    }

    #[test]
    fn failed_connection_rejects_submissions() {
        let h = Harness::new();
        let mut conn = h.open(ScriptState::Dead);
        let err = h.submit(&mut conn, "select 1").unwrap_err();
        assert!(matches!(err, SubmitError::ConnectionFailed));
        assert_eq!(conn.pending(), 0);

        let mut conn = h.open(ScriptState::Init);
        assert!(matches!(
            h.submit(&mut conn, "select 1"),
            Err(SubmitError::ConnectionFailed)
        ));
    }

    #[test]
    fn rejected_immediate_execute_leaves_nothing_queued() {
        let h = Harness::new();
        let mut conn = h.open(ScriptState::Ready);
        let err = h.submit(&mut conn, "bad query").unwrap_err();
        assert!(matches!(err, SubmitError::Execute(_)));
        assert_eq!(conn.pending(), 0);
        assert_eq!(conn.readiness(), Readiness::Idle);
        assert!(h.completions().is_empty());

        h.submit(&mut conn, "select 1").expect("still usable");
        assert_eq!(conn.engine().executed, vec!["select 1"]);
    }

    #[test]
    fn pump_fails_rejected_head_and_waits_for_next_event() {
        let h = Harness::new();
        let mut conn = h.open(ScriptState::Connecting);
        h.submit(&mut conn, "bad one").expect("q1");
        h.submit(&mut conn, "select 2").expect("q2");

        connected(&mut conn);
        let completions = h.completions();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].0, "bad one");
        assert!(matches!(completions[0].1, Err(QueryError::Execute(_))));
        assert!(conn.engine().executed.is_empty());
        assert_eq!(conn.pending(), 1);
        assert_eq!(conn.in_flight(), None);

        connected(&mut conn);
        assert_eq!(conn.engine().executed, vec!["select 2"]);
    }

    #[test]
    fn callback_submissions_queue_behind_waiting_queries() {
        let h = Harness::new();
        let mut conn = h.open(ScriptState::Connecting);
        let log = h.log.clone();
        conn.submit("q1", move |completion| {
            let outcome = completion.outcome.clone().map(|p| p.to_string());
            log.lock().unwrap().push(("q1".to_string(), outcome));
            let follow_up = log.clone();
            completion
                .connection
                .submit("q3", move |completion| record(&follow_up, "q3", completion))
                .expect("follow-up");
        })
        .expect("q1");
        h.submit(&mut conn, "q2").expect("q2");

        connected(&mut conn);
        result(&mut conn, "R1");
        done(&mut conn);
        assert_eq!(conn.engine().executed, vec!["q1", "q2"]);
        result(&mut conn, "R2");
        done(&mut conn);
        result(&mut conn, "R3");
        done(&mut conn);
        assert_eq!(
            h.completions(),
            vec![ok("q1", "R1"), ok("q2", "R2"), ok("q3", "R3")]
        );
    }

    #[test]
    fn callback_submission_on_idle_engine_runs_immediately() {
        let h = Harness::new();
        let mut conn = h.open(ScriptState::Ready);
        let log = h.log.clone();
        conn.submit("q1", move |completion| {
            let outcome = completion.outcome.clone().map(|p| p.to_string());
            log.lock().unwrap().push(("q1".to_string(), outcome));
            let follow_up = log.clone();
            completion
                .connection
                .submit("q2", move |completion| record(&follow_up, "q2", completion))
                .expect("follow-up");
            assert!(completion.connection.in_flight().is_some());
        })
        .expect("q1");
        result(&mut conn, "R1");
        done(&mut conn);
        assert_eq!(conn.engine().executed, vec!["q1", "q2"]);
        result(&mut conn, "R2");
        done(&mut conn);
        assert_eq!(h.completions(), vec![ok("q1", "R1"), ok("q2", "R2")]);
    }

    #[test]
    fn submissions_during_teardown_are_rejected() {
        let h = Harness::new();
        let mut conn = h.open(ScriptState::Ready);
        let rejected = Arc::new(AtomicUsize::new(0));
        let seen = rejected.clone();
        conn.submit("q1", move |completion| {
            assert!(completion.is_error());
            if let Err(SubmitError::Closing) = completion.connection.submit("retry", |_| {}) {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        })
        .expect("q1");
        conn.on_fatal_failure(anyhow!("gone"));
        assert_eq!(rejected.load(Ordering::SeqCst), 1);
        assert_eq!(h.fatal.lock().unwrap().len(), 1);
    }

    #[test]
    fn shutdown_fails_pending_without_fatal_callback() {
        let h = Harness::new();
        let mut conn = h.open(ScriptState::Connecting);
        h.submit(&mut conn, "q1").expect("q1");
        h.submit(&mut conn, "q2").expect("q2");
        let engine = conn.shutdown();
        assert!(engine.executed.is_empty());
        assert_eq!(
            h.completions(),
            vec![err("q1", QueryError::Shutdown), err("q2", QueryError::Shutdown)]
        );
        assert!(h.fatal.lock().unwrap().is_empty());
    }

    #[test]
    fn handle_event_routes_to_aggregator() {
        let h = Harness::new();
        let mut conn = h.open(ScriptState::Connecting);
        h.submit(&mut conn, "select 1").expect("submit");
        conn.engine_mut().state = ScriptState::Ready;
        let mut conn = conn.handle_event(EngineEvent::Connected).expect("alive");
        conn = conn
            .handle_event(EngineEvent::ResultReceived(Arc::new("R1".into())))
            .expect("alive");
        conn.engine_mut().state = ScriptState::Ready;
        let conn = conn.handle_event(EngineEvent::StatementDone).expect("alive");
        assert_eq!(h.completions(), vec![ok("select 1", "R1")]);
        assert_eq!(conn.pending(), 0);
    }

    #[test]
    #[should_panic(expected = "no query in flight")]
    fn result_without_query_is_a_contract_violation() {
        let h = Harness::new();
        let mut conn = h.open(ScriptState::Ready);
        result(&mut conn, "stray");
    }

    #[test]
    #[should_panic(expected = "never executed")]
    fn done_for_unexecuted_head_is_a_contract_violation() {
        let h = Harness::new();
        let mut conn = h.open(ScriptState::Connecting);
        h.submit(&mut conn, "select 1").expect("submit");
        conn.on_statement_done();
    }
}
