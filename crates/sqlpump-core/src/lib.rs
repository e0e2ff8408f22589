pub mod dispatch;
pub mod engine;
pub mod error;
pub mod types;

pub use dispatch::{Completion, Connection};
pub use engine::{Engine, EngineEvent};
pub use error::{QueryError, SubmitError};
pub use types::{QueryId, Readiness};

#[cfg(test)]
mod tests;
