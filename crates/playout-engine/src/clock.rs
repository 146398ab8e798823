//! Audio/video synchronization clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use playout_ipc::PlayerConfig;

/// Which clock video frames follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterSource {
    /// Follow the audio device's playback position.
    Audio,

    /// Pace frames at the nominal frame interval.
    WallClock,
}

impl MasterSource {
    /// Audio is master whenever an audio stream is being played.
    pub fn for_streams(has_audio: bool) -> Self {
        if has_audio {
            Self::Audio
        } else {
            Self::WallClock
        }
    }
}

/// Thresholds and pacing for a [`SyncClock`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockSettings {
    /// Video further ahead of audio than this waits for it.
    pub sync_threshold: Duration,

    /// Video further behind audio than this stops waiting and skips ahead.
    pub no_sync_threshold: Duration,

    /// Nominal time between frames.
    pub frame_interval: Duration,
}

impl ClockSettings {
    /// Build settings from a config and the stream's frame interval.
    pub fn from_config(config: &PlayerConfig, frame_interval: Duration) -> Self {
        Self {
            sync_threshold: config.sync_threshold(),
            no_sync_threshold: config.no_sync_threshold(),
            frame_interval,
        }
    }
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self {
            sync_threshold: Duration::from_millis(10),
            no_sync_threshold: Duration::from_secs(10),
            frame_interval: Duration::from_millis(40),
        }
    }
}

/// What the presenter should do with the next video frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncDecision {
    /// How long to wait before presenting.
    pub delay: Duration,

    /// Video is hopelessly behind; drop queued frames and show the newest.
    pub catch_up: bool,
}

impl SyncDecision {
    fn wait(delay: Duration) -> Self {
        Self {
            delay,
            catch_up: false,
        }
    }
}

/// Shared audio and video clocks.
///
/// Each side has exactly one writer: the audio sink writes the audio
/// clock, the presenter writes the video clock. Values are `f64` seconds
/// stored as bits, each tagged with the epoch it was written in.
///
/// [`reset`](Self::reset) only starts a new epoch. A position written in
/// an older epoch reads as zero, and audio updates tagged with an older
/// epoch are refused, so samples decoded before a seek can never move the
/// clock after it.
#[derive(Debug)]
pub struct SyncClock {
    master: MasterSource,
    settings: ClockSettings,
    audio: AtomicU64,
    audio_epoch: AtomicU64,
    video: AtomicU64,
    video_epoch: AtomicU64,
    epoch: AtomicU64,
}

/// Tag for a side that has not been written yet.
const UNWRITTEN: u64 = u64::MAX;

impl SyncClock {
    pub fn new(master: MasterSource, settings: ClockSettings) -> Self {
        Self {
            master,
            settings,
            audio: AtomicU64::new(0f64.to_bits()),
            audio_epoch: AtomicU64::new(UNWRITTEN),
            video: AtomicU64::new(0f64.to_bits()),
            video_epoch: AtomicU64::new(UNWRITTEN),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn master(&self) -> MasterSource {
        self.master
    }

    pub fn settings(&self) -> &ClockSettings {
        &self.settings
    }

    /// Current epoch. Captured by the audio sink before it converts samples
    /// and by the presenter when it takes a frame.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Record the audio playback position. Returns false if `epoch` is stale.
    pub fn update_audio(&self, epoch: u64, seconds: f64) -> bool {
        if self.epoch() != epoch {
            return false;
        }
        self.audio.store(seconds.to_bits(), Ordering::SeqCst);
        self.audio_epoch.store(epoch, Ordering::SeqCst);

        // A reset landing after the check leaves the write tagged stale.
        self.epoch() == epoch
    }

    /// Record the pts of the frame just presented.
    pub fn update_video(&self, seconds: f64) {
        let epoch = self.epoch();
        self.video.store(seconds.to_bits(), Ordering::SeqCst);
        self.video_epoch.store(epoch, Ordering::SeqCst);
    }

    /// Start a new epoch. Both positions read as zero until written again.
    pub fn reset(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    pub fn audio_clock(&self) -> f64 {
        if self.has_audio() {
            f64::from_bits(self.audio.load(Ordering::SeqCst))
        } else {
            0.0
        }
    }

    pub fn video_clock(&self) -> f64 {
        if self.video_epoch.load(Ordering::SeqCst) == self.epoch() {
            f64::from_bits(self.video.load(Ordering::SeqCst))
        } else {
            0.0
        }
    }

    /// True once audio has been played in the current epoch.
    pub fn has_audio(&self) -> bool {
        self.audio_epoch.load(Ordering::SeqCst) == self.epoch()
    }

    /// True when video timing follows a live audio position.
    pub fn is_audio_driven(&self) -> bool {
        self.master == MasterSource::Audio && self.has_audio()
    }

    /// How long to wait before presenting a frame stamped `video_pts` seconds.
    pub fn delay_for_next_video_frame(&self, video_pts: f64) -> SyncDecision {
        if !self.is_audio_driven() {
            return SyncDecision::wait(self.settings.frame_interval);
        }

        let diff = video_pts - self.audio_clock();
        if diff > self.settings.sync_threshold.as_secs_f64() {
            SyncDecision::wait(Duration::from_secs_f64(diff))
        } else if diff < -self.settings.no_sync_threshold.as_secs_f64() {
            SyncDecision {
                delay: Duration::ZERO,
                catch_up: true,
            }
        } else {
            SyncDecision::wait(Duration::ZERO)
        }
    }
}
