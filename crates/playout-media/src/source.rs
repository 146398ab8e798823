//! The demux/decode seam.

use std::time::Duration;

use bytes::Bytes;

use crate::frame::{FramePayload, StreamKind};
use crate::time::{Rational, Timestamp};
use crate::MediaResult;

/// Video stream properties.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoStreamInfo {
    pub width: u32,
    pub height: u32,

    /// Nominal frame rate, if the container reports one.
    pub frame_rate: Option<f64>,

    pub time_base: Rational,
}

/// Audio stream properties.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioStreamInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub time_base: Rational,
}

/// What a source found when it was opened.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub video: VideoStreamInfo,
    pub audio: Option<AudioStreamInfo>,
    pub duration: Option<Duration>,
}

/// Options applied when opening a source.
#[derive(Debug, Clone)]
pub struct SourceOptions {
    /// Open the audio stream. When false the source reports no audio.
    pub decode_audio: bool,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self { decode_audio: true }
    }
}

/// A compressed unit read from the container.
#[derive(Debug, Clone)]
pub struct CompressedUnit {
    pub kind: StreamKind,
    pub data: Bytes,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub duration: i64,
    pub keyframe: bool,
}

/// Result of reading from a source.
#[derive(Debug)]
pub enum ReadOutcome {
    Unit(CompressedUnit),
    EndOfStream,
}

/// A decoded picture or block of samples, not yet wrapped as a [`crate::Frame`].
#[derive(Debug)]
pub struct DecodedFrame {
    pub pts: Timestamp,
    pub payload: FramePayload,
}

/// Result of feeding one unit to the decoder.
#[derive(Debug)]
pub enum DecodeOutcome {
    /// Zero or more frames became available.
    Frames(Vec<DecodedFrame>),

    /// The decoder needs more input before it can emit anything.
    NeedMoreInput,
}

/// A demuxer plus decoders for one media file.
///
/// A source is driven by exactly one thread at a time.
pub trait MediaSource: Send {
    /// Stream layout discovered at open time.
    fn info(&self) -> &StreamInfo;

    /// Read the next compressed unit in container order.
    fn read_next_unit(&mut self) -> MediaResult<ReadOutcome>;

    /// Decode one unit.
    fn decode(&mut self, unit: CompressedUnit) -> MediaResult<DecodeOutcome>;

    /// Reposition to `position` from the start of the media.
    fn seek(&mut self, position: Duration) -> MediaResult<()>;

    /// Discard any state buffered inside the decoders.
    fn flush(&mut self);
}

impl StreamInfo {
    /// Nominal frame interval, falling back to `fallback_fps`.
    pub fn frame_interval(&self, fallback_fps: f64) -> Duration {
        let fps = self
            .video
            .frame_rate
            .filter(|fps| fps.is_finite() && *fps > 0.0)
            .unwrap_or(fallback_fps);
        Duration::from_secs_f64(1.0 / fps)
    }
}
