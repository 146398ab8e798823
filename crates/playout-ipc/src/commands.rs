//! Commands accepted by the player, in wire and domain form.

use serde::{Deserialize, Serialize};
use serde_json::Number;
use thiserror::Error;

/// Playback volume as a percentage.
///
/// Construction clamps into `0..=100`, so a `Volume` is always valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "Number", into = "u8")]
pub struct Volume(u8);

impl Volume {
    /// Full volume.
    pub const MAX: Volume = Volume(100);

    /// Silence.
    pub const MUTE: Volume = Volume(0);

    /// Clamp an arbitrary integer into a volume.
    pub fn clamped(raw: i64) -> Self {
        Self(raw.clamp(0, 100) as u8)
    }

    /// Clamp any JSON number, rounding fractions to the nearest percent.
    pub fn from_number(raw: &Number) -> Self {
        if let Some(v) = raw.as_i64() {
            Self::clamped(v)
        } else if raw.is_u64() {
            // Only integers above i64::MAX get here.
            Self::MAX
        } else {
            let v = raw.as_f64().unwrap_or(0.0);
            Self(v.round().clamp(0.0, 100.0) as u8)
        }
    }

    /// Volume as a percentage.
    pub fn percent(self) -> u8 {
        self.0
    }

    /// Linear gain in `0.0..=1.0`.
    pub fn gain(self) -> f32 {
        f32::from(self.0) / 100.0
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self::MAX
    }
}

impl From<i64> for Volume {
    fn from(raw: i64) -> Self {
        Self::clamped(raw)
    }
}

impl From<Number> for Volume {
    fn from(raw: Number) -> Self {
        Self::from_number(&raw)
    }
}

impl From<Volume> for u8 {
    fn from(volume: Volume) -> Self {
        volume.0
    }
}

/// Commands the controller understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerCommand {
    /// Resume playback.
    Play,

    /// Pause playback.
    Pause,

    /// Stop playback and shut the pipeline down.
    Stop,

    /// Seek back to the start of the media.
    Reset,

    /// Change the output volume.
    SetVolume(Volume),
}

impl PlayerCommand {
    /// Wire name of this command.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Play => "play",
            Self::Pause => "pause",
            Self::Stop => "stop",
            Self::Reset => "reset",
            Self::SetVolume(_) => "volume",
        }
    }
}

/// Command names recognised on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Play,
    Pause,
    Stop,
    Reset,
    Volume,
}

/// A remote command as it arrives over the control channel.
///
/// `{"token": "...", "command": "volume", "value": 42}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCommand {
    /// Session token.
    pub token: String,

    /// Command name.
    pub command: CommandKind,

    /// Numeric argument, only meaningful for `volume`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Number>,
}

/// Errors turning a wire command into a [`PlayerCommand`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// The command needs a numeric `value` and none was given.
    #[error("command '{0}' requires a numeric value")]
    MissingValue(&'static str),
}

impl RemoteCommand {
    /// Convert into the domain command. Volume values are clamped.
    pub fn to_player_command(&self) -> Result<PlayerCommand, CommandError> {
        Ok(match self.command {
            CommandKind::Play => PlayerCommand::Play,
            CommandKind::Pause => PlayerCommand::Pause,
            CommandKind::Stop => PlayerCommand::Stop,
            CommandKind::Reset => PlayerCommand::Reset,
            CommandKind::Volume => {
                let raw = self.value.as_ref().ok_or(CommandError::MissingValue("volume"))?;
                PlayerCommand::SetVolume(Volume::from_number(raw))
            }
        })
    }
}
