//! Decoded frame types.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::time::Timestamp;

/// Which elementary stream a frame or unit belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video,
    Audio,
}

impl StreamKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

/// A packed RGBA8 picture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoBuffer {
    /// Pixel data, `stride * height` bytes.
    pub data: Bytes,

    /// Width in pixels.
    pub width: u32,

    /// Height in pixels.
    pub height: u32,

    /// Bytes per row.
    pub stride: usize,
}

impl VideoBuffer {
    /// Create a tightly packed buffer (`stride == width * 4`).
    pub fn packed(data: Bytes, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
            stride: width as usize * 4,
        }
    }

    /// Expected buffer size for the given dimensions.
    pub fn rgba_buffer_size(width: u32, height: u32) -> usize {
        width as usize * height as usize * 4
    }

    /// Validate that the data covers every row.
    pub fn is_valid(&self) -> bool {
        self.stride >= self.width as usize * 4 && self.data.len() >= self.stride * self.height as usize
    }
}

/// Interleaved f32 PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Samples, interleaved by channel.
    pub samples: Vec<f32>,

    /// Sample rate in Hz.
    pub sample_rate: u32,

    /// Number of channels.
    pub channels: u16,
}

impl AudioBuffer {
    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    /// Playback duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames() as f64 / f64::from(self.sample_rate)
        }
    }
}

/// Decoded contents of a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FramePayload {
    Video(VideoBuffer),
    Audio(AudioBuffer),
}

impl FramePayload {
    pub fn kind(&self) -> StreamKind {
        match self {
            Self::Video(_) => StreamKind::Video,
            Self::Audio(_) => StreamKind::Audio,
        }
    }
}

/// Counts frames created and released so tests can prove nothing leaks.
#[derive(Debug, Default)]
pub struct FrameLedger {
    created: AtomicU64,
    released: AtomicU64,
}

impl FrameLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Total frames registered.
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Acquire)
    }

    /// Total frames dropped.
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Acquire)
    }

    /// Frames currently alive.
    pub fn live(&self) -> u64 {
        self.created().saturating_sub(self.released())
    }

    fn register(self: &Arc<Self>) -> LedgerEntry {
        self.created.fetch_add(1, Ordering::AcqRel);
        LedgerEntry {
            ledger: Some(Arc::clone(self)),
        }
    }
}

/// Releases its ledger slot on drop.
#[derive(Debug)]
struct LedgerEntry {
    ledger: Option<Arc<FrameLedger>>,
}

impl Drop for LedgerEntry {
    fn drop(&mut self) {
        if let Some(ledger) = self.ledger.take() {
            ledger.released.fetch_add(1, Ordering::AcqRel);
        }
    }
}

/// A decoded, timestamped unit of video or audio.
///
/// Frames are move-only. Whoever holds one owns it, and dropping it releases
/// the payload and its ledger slot exactly once.
#[derive(Debug)]
pub struct Frame {
    pts: Timestamp,
    sequence: u64,
    payload: FramePayload,
    _entry: LedgerEntry,
}

impl Frame {
    /// Create a frame that is not tracked by any ledger.
    pub fn new(pts: Timestamp, sequence: u64, payload: FramePayload) -> Self {
        Self {
            pts,
            sequence,
            payload,
            _entry: LedgerEntry { ledger: None },
        }
    }

    /// Create a frame registered with `ledger`.
    pub fn tracked(
        pts: Timestamp,
        sequence: u64,
        payload: FramePayload,
        ledger: &Arc<FrameLedger>,
    ) -> Self {
        Self {
            pts,
            sequence,
            payload,
            _entry: ledger.register(),
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.payload.kind()
    }

    pub fn pts(&self) -> Timestamp {
        self.pts
    }

    /// Presentation time in seconds.
    pub fn pts_seconds(&self) -> f64 {
        self.pts.seconds()
    }

    /// Monotonic per-stream sequence number, for diagnostics.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn payload(&self) -> &FramePayload {
        &self.payload
    }

    pub fn video(&self) -> Option<&VideoBuffer> {
        match &self.payload {
            FramePayload::Video(buffer) => Some(buffer),
            FramePayload::Audio(_) => None,
        }
    }

    pub fn audio(&self) -> Option<&AudioBuffer> {
        match &self.payload {
            FramePayload::Audio(buffer) => Some(buffer),
            FramePayload::Video(_) => None,
        }
    }
}
