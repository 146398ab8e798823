//! Remote control over a websocket.
//!
//! Peers send one JSON command per text message. Each message carries the
//! session token; a bad token or payload closes the connection.

mod auth;
mod error;
mod protocol;
mod server;

pub use auth::AuthToken;
pub use error::ControlError;
pub use protocol::{route, CloseReason, Disposition};
pub use server::{CommandSink, ControlServer};

/// Result type for control channel operations.
pub type ControlResult<T> = Result<T, ControlError>;

/// How long `stop` waits for connection tasks before dropping them.
pub const SHUTDOWN_TIMEOUT_MS: u64 = 1000;
