//! Error types for the audio module.

use thiserror::Error;

/// Errors that can occur during audio output.
#[derive(Debug, Error)]
pub enum AudioError {
    /// No usable output device.
    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    /// Audio format not supported.
    #[error("Audio format not supported: {0}")]
    FormatNotSupported(String),

    /// Output already started.
    #[error("Audio output already started")]
    AlreadyStarted,

    /// Output not started.
    #[error("Audio output not started")]
    NotStarted,

    /// The output stream could not be created or started.
    #[error("Audio stream error: {0}")]
    Stream(String),

    /// Spawning the output thread failed.
    #[error("Audio thread error: {0}")]
    Thread(#[from] std::io::Error),
}

#[cfg(feature = "cpal")]
impl From<cpal::DefaultStreamConfigError> for AudioError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        Self::FormatNotSupported(err.to_string())
    }
}

#[cfg(feature = "cpal")]
impl From<cpal::BuildStreamError> for AudioError {
    fn from(err: cpal::BuildStreamError) -> Self {
        Self::Stream(err.to_string())
    }
}

#[cfg(feature = "cpal")]
impl From<cpal::PlayStreamError> for AudioError {
    fn from(err: cpal::PlayStreamError) -> Self {
        Self::Stream(err.to_string())
    }
}
