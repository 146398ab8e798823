//! Error types for the player.

use thiserror::Error;

use playout_audio::AudioError;
use playout_ipc::{ConfigError, PlaybackState, StartupPhase};
use playout_media::MediaError;

/// Errors that stop the player from starting or running.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("media error: {0}")]
    Media(#[from] MediaError),

    #[error("audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("display error: {0}")]
    Display(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A startup phase failed; everything before it has been rolled back.
    #[error("{phase:?} failed: {source}")]
    Startup {
        phase: StartupPhase,
        #[source]
        source: Box<PlayerError>,
    },

    #[error("failed to spawn {name} thread: {source}")]
    Thread {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} is not initialized")]
    NotInitialized(&'static str),

    #[error("player already started")]
    AlreadyStarted,
}

/// Why the controller refused a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// The pipeline has not finished starting.
    #[error("player is still starting")]
    NotStarted,

    /// Shutdown has begun; nothing more is accepted.
    #[error("player is {0}")]
    Terminal(PlaybackState),
}
