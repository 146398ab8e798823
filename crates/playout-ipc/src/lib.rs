//! Typed commands, events and configuration for the playout pipeline.
//!
//! This crate defines the message types shared between the control
//! channel, the player controller and anything observing playback.

mod commands;
mod events;
mod state;
mod types;

pub use commands::{CommandError, CommandKind, PlayerCommand, RemoteCommand, Volume};
pub use events::PlayerEvent;
pub use state::{PlaybackState, ShutdownPhase, StartupPhase, StopReason};
pub use types::{ConfigError, PlaybackMetrics, PlayerConfig, DEFAULT_CONTROL_PORT};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for events (player → observers).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<PlayerEvent>, Receiver<PlayerEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
