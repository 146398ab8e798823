//! Error types for the control channel.

use thiserror::Error;

/// Errors that can occur starting or running the control server.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The listening socket could not be bound.
    #[error("failed to bind control channel on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The async runtime could not be created.
    #[error("failed to start control runtime: {0}")]
    Runtime(#[source] std::io::Error),

    /// The server was already stopped.
    #[error("control server is not running")]
    NotRunning,
}
