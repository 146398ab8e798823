//! Audio output backends and mixing for the playout pipeline.
//!
//! Outputs pull samples through a non-blocking callback. The headless
//! output paces the callback on its own thread; the cpal output (behind
//! the `cpal` feature) plays through the default device.

#[cfg(feature = "cpal")]
mod cpal_output;
mod error;
mod mixer;
mod output;

#[cfg(feature = "cpal")]
pub use cpal_output::CpalOutput;
pub use error::AudioError;
pub use mixer::{mix_into, soft_clip, VolumeControl};
pub use output::{AudioCallback, AudioOutput, HeadlessOutput};

/// Result type for audio operations.
pub type AudioResult<T> = Result<T, AudioError>;

/// Audio sample rate in Hz.
pub const SAMPLE_RATE: u32 = 48000;

/// Number of audio channels.
pub const CHANNELS: u16 = 2;

/// Frames per device callback.
pub const BUFFER_FRAMES: usize = 1024;
