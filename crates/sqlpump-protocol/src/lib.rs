pub mod backend;
pub mod frontend;
pub mod messages;
#[cfg(any(test, feature = "server"))]
pub mod server;
mod wire;

pub use messages::BackendMessage;
pub use messages::FrontendMessage;
