//! Frames, bounded frame queues and media sources for the playout pipeline.
//!
//! Sources turn a media file into timestamped [`Frame`]s. Frames travel from
//! the decoder thread to the consumers through [`BoundedFrameQueue`]s.

mod convert;
mod error;
#[cfg(feature = "ffmpeg")]
mod ffmpeg;
mod frame;
mod queue;
mod source;
mod synthetic;
mod time;

pub use convert::{LinearResampler, NearestScaler, OutputSpec, Resampler, Scaler};
pub use error::MediaError;
#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegSource;
pub use frame::{AudioBuffer, Frame, FrameLedger, FramePayload, StreamKind, VideoBuffer};
pub use queue::{BoundedFrameQueue, OverflowPolicy, PushOutcome};
pub use source::{
    AudioStreamInfo, CompressedUnit, DecodeOutcome, DecodedFrame, MediaSource, ReadOutcome,
    SourceOptions, StreamInfo, VideoStreamInfo,
};
pub use synthetic::{SyntheticParams, SyntheticSource};
pub use time::{Rational, Timestamp};

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Default capacity of the video queue.
pub const DEFAULT_VIDEO_QUEUE_CAPACITY: usize = 10;

/// Default capacity of the audio queue.
pub const DEFAULT_AUDIO_QUEUE_CAPACITY: usize = 50;

/// Open a media source.
///
/// `testsrc:` URIs produce a [`SyntheticSource`]. Anything else is treated
/// as a file path and needs the `ffmpeg` feature.
pub fn open_source(uri: &str, options: &SourceOptions) -> MediaResult<Box<dyn MediaSource>> {
    if uri.starts_with(synthetic::SCHEME) {
        return Ok(Box::new(SyntheticSource::open(uri, options)?));
    }

    #[cfg(feature = "ffmpeg")]
    {
        Ok(Box::new(FfmpegSource::open(uri, options)?))
    }

    #[cfg(not(feature = "ffmpeg"))]
    {
        Err(MediaError::NotSupported(format!(
            "cannot open '{uri}': built without the ffmpeg feature, only testsrc: URIs are available"
        )))
    }
}
