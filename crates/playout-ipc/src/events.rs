//! Events emitted by the player.

use serde::{Deserialize, Serialize};

use crate::state::PlaybackState;
use crate::types::PlaybackMetrics;

/// Events that the player can send to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PlayerEvent {
    /// Startup finished and playback is about to begin.
    Ready,

    /// Playback state has changed.
    StateChanged {
        /// Previous state.
        previous: PlaybackState,

        /// Current state.
        current: PlaybackState,
    },

    /// Periodic pipeline metrics.
    Metrics(PlaybackMetrics),

    /// The source reached its end and playback wrapped to the start.
    Looped {
        /// Number of completed passes over the media.
        iteration: u64,
    },

    /// A command was refused by the controller.
    CommandRejected {
        /// Wire name of the command.
        command: String,

        /// Why it was refused.
        reason: String,
    },

    /// Error occurred.
    Error {
        /// Whether the error is recoverable.
        recoverable: bool,

        /// Error message.
        message: String,
    },

    /// Player has shut down.
    Shutdown,
}
