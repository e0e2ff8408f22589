use crate::types::Readiness;
use std::fmt;

/// A wire-protocol driver the dispatcher can hand statements to.
///
/// Implementations own their fine-grained connection lifecycle and report
/// progress through [`EngineEvent`]s, delivered to
/// [`Connection::handle_event`](crate::Connection::handle_event) by whatever
/// reactor drives the engine's IO.
pub trait Engine: Sized {
    type Params;
    /// Fine-grained engine state. Its `Into<Readiness>` impl is the only thing
    /// the dispatcher ever learns about it.
    type State: Copy + fmt::Debug + Into<Readiness>;
    /// Opaque result of one statement.
    type Payload;

    /// Starts connecting. Completion is reported later as
    /// [`EngineEvent::Connected`] or [`EngineEvent::FatalFailure`].
    fn connect(params: Self::Params) -> anyhow::Result<Self>;

    fn state(&self) -> Self::State;

    /// Accepts one statement for execution. Only acceptance is synchronous;
    /// the outcome arrives as events.
    fn execute(&mut self, command: &str) -> anyhow::Result<()>;

    fn readiness(&self) -> Readiness {
        self.state().into()
    }
}

#[derive(Debug)]
pub enum EngineEvent<P> {
    Connected,
    ResultReceived(P),
    StatementDone,
    FatalFailure(anyhow::Error),
}
