//! Error types for the media module.

use thiserror::Error;

/// Errors that can occur while opening, reading or decoding media.
#[derive(Debug, Error)]
pub enum MediaError {
    /// The media could not be opened.
    #[error("Failed to open media '{uri}': {reason}")]
    OpenFailed { uri: String, reason: String },

    /// The media has no video stream.
    #[error("No video stream found")]
    NoVideoStream,

    /// No decoder is available for a stream.
    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// A source URI could not be parsed.
    #[error("Invalid source URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    /// Reading the next compressed unit failed.
    #[error("Read error: {0}")]
    Read(String),

    /// A single unit failed to decode.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Repositioning the source failed.
    #[error("Seek error: {0}")]
    Seek(String),

    /// Pixel or sample conversion failed.
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// The requested backend is not compiled in.
    #[error("Not supported: {0}")]
    NotSupported(String),
}

#[cfg(feature = "ffmpeg")]
impl From<ffmpeg_next::Error> for MediaError {
    fn from(err: ffmpeg_next::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
