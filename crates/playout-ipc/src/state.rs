//! Player state machine types.

use serde::{Deserialize, Serialize};

/// The current playback state of the player.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// Resources are being set up.
    #[default]
    Initializing,

    /// Frames are flowing to the outputs.
    Playing,

    /// Decoding and presentation are suspended.
    Paused,

    /// A seek has been requested and the decoder has not acknowledged it.
    SeekPending,

    /// Stop was requested; resources are being released.
    ShuttingDown,

    /// Terminal state.
    Stopped,
}

impl PlaybackState {
    /// Returns true if frames are being presented.
    pub fn is_playing(&self) -> bool {
        matches!(self, Self::Playing)
    }

    /// Returns true if playback is paused.
    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused)
    }

    /// Returns true while a seek is outstanding.
    pub fn is_seek_pending(&self) -> bool {
        matches!(self, Self::SeekPending)
    }

    /// Returns true once shutdown has begun. No command is accepted past this point.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ShuttingDown | Self::Stopped)
    }

    /// Returns a simple string representation of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initializing => "Initializing",
            Self::Playing => "Playing",
            Self::Paused => "Paused",
            Self::SeekPending => "SeekPending",
            Self::ShuttingDown => "ShuttingDown",
            Self::Stopped => "Stopped",
        }
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Startup phases for the player, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartupPhase {
    /// Opening the media source and probing streams.
    OpenSource,

    /// Opening the audio output.
    InitAudio,

    /// Opening the video output.
    InitDisplay,

    /// Spawning the decoder thread.
    StartDecoder,
}

impl StartupPhase {
    /// The first phase.
    pub const FIRST: StartupPhase = StartupPhase::OpenSource;

    /// The last phase.
    pub const LAST: StartupPhase = StartupPhase::StartDecoder;

    /// Returns the next phase, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::OpenSource => Some(Self::InitAudio),
            Self::InitAudio => Some(Self::InitDisplay),
            Self::InitDisplay => Some(Self::StartDecoder),
            Self::StartDecoder => None,
        }
    }

    /// Returns the previous phase, if any (for rollback).
    pub fn previous(self) -> Option<Self> {
        match self {
            Self::OpenSource => None,
            Self::InitAudio => Some(Self::OpenSource),
            Self::InitDisplay => Some(Self::InitAudio),
            Self::StartDecoder => Some(Self::InitDisplay),
        }
    }

    /// Returns the display name for this phase.
    pub fn name(self) -> &'static str {
        match self {
            Self::OpenSource => "Opening media",
            Self::InitAudio => "Initializing audio",
            Self::InitDisplay => "Initializing display",
            Self::StartDecoder => "Starting decoder",
        }
    }
}

/// Shutdown phases for the player, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownPhase {
    /// Signalling and joining the decoder thread.
    StopDecoder,

    /// Dropping every queued frame.
    FlushQueues,

    /// Stopping the audio output.
    CloseAudio,

    /// Closing the video output.
    CloseDisplay,
}

impl ShutdownPhase {
    /// Returns the next phase, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::StopDecoder => Some(Self::FlushQueues),
            Self::FlushQueues => Some(Self::CloseAudio),
            Self::CloseAudio => Some(Self::CloseDisplay),
            Self::CloseDisplay => None,
        }
    }

    /// Returns the display name for this phase.
    pub fn name(self) -> &'static str {
        match self {
            Self::StopDecoder => "Stopping decoder",
            Self::FlushQueues => "Flushing queues",
            Self::CloseAudio => "Closing audio",
            Self::CloseDisplay => "Closing display",
        }
    }
}

/// Reason playback stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// A remote `stop` command.
    RemoteCommand,

    /// An OS termination signal.
    Signal,

    /// Fatal error occurred.
    FatalError { message: String },
}

impl StopReason {
    /// Returns a display message for this reason.
    pub fn message(&self) -> String {
        match self {
            Self::RemoteCommand => "Stopped by remote command".to_string(),
            Self::Signal => "Stopped by signal".to_string(),
            Self::FatalError { message } => format!("Fatal error: {message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_phases_walk_forward_and_back() {
        let mut phase = StartupPhase::FIRST;
        let mut forward = vec![phase];
        while let Some(next) = phase.next() {
            forward.push(next);
            phase = next;
        }
        assert_eq!(phase, StartupPhase::LAST);
        assert_eq!(forward.len(), 4);

        let mut back = vec![phase];
        while let Some(prev) = phase.previous() {
            back.push(prev);
            phase = prev;
        }
        back.reverse();
        assert_eq!(forward, back);
    }

    #[test]
    fn test_terminal_states() {
        assert!(PlaybackState::ShuttingDown.is_terminal());
        assert!(PlaybackState::Stopped.is_terminal());
        assert!(!PlaybackState::Paused.is_terminal());
        assert!(!PlaybackState::SeekPending.is_terminal());
    }

    #[test]
    fn test_state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&PlaybackState::SeekPending).unwrap(),
            "\"seek_pending\""
        );
    }
}
