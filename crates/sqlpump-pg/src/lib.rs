pub mod client;
pub mod config;
pub mod driver;
pub mod engine;
pub mod result;

pub use client::{Client, ClientError, PendingQuery};
pub use config::{ClientOptions, PgConfig};
pub use driver::connect;
pub use engine::{PgEngine, PgState};
pub use result::{PgResult, ResultStatus, ServerError};
