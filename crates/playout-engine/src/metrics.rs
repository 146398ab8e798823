//! Metrics collection and reporting.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::info;

use playout_ipc::PlaybackMetrics;

struct FrameWindow {
    // (presented at, time spent presenting)
    samples: VecDeque<(Instant, Duration)>,
    capacity: usize,
}

/// Collects pipeline counters and a rolling window of present timings.
///
/// Counters are written from the decoder, presenter and audio threads.
pub struct MetricsCollector {
    start_time: RwLock<Option<Instant>>,
    frames_decoded: AtomicU64,
    frames_presented: AtomicU64,
    frames_late: AtomicU64,
    audio_frames_played: AtomicU64,
    audio_frames_dropped: AtomicU64,
    audio_underruns: AtomicU64,
    decode_errors: AtomicU64,
    loops: AtomicU64,
    window: Mutex<FrameWindow>,
    log_interval: u64,
}

impl MetricsCollector {
    /// Create a collector averaging over `window` frames and logging every
    /// `log_interval` presented frames (0 disables the log line).
    pub fn new(window: usize, log_interval: u64) -> Self {
        let window = window.max(2);
        Self {
            start_time: RwLock::new(None),
            frames_decoded: AtomicU64::new(0),
            frames_presented: AtomicU64::new(0),
            frames_late: AtomicU64::new(0),
            audio_frames_played: AtomicU64::new(0),
            audio_frames_dropped: AtomicU64::new(0),
            audio_underruns: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            loops: AtomicU64::new(0),
            window: Mutex::new(FrameWindow {
                samples: VecDeque::with_capacity(window),
                capacity: window,
            }),
            log_interval,
        }
    }

    /// Start metrics collection.
    pub fn start(&self) {
        *self.start_time.write() = Some(Instant::now());
    }

    /// Stop metrics collection.
    pub fn stop(&self) {
        *self.start_time.write() = None;
    }

    pub fn record_decoded(&self) {
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_loop(&self) -> u64 {
        self.loops.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_late(&self, frames: u64) {
        self.frames_late.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn record_audio_played(&self) {
        self.audio_frames_played.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audio_dropped(&self) {
        self.audio_frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_underrun(&self) {
        self.audio_underruns.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a presented frame and how long presenting it took.
    ///
    /// Returns true when a periodic log line is due.
    pub fn record_presented(&self, present_time: Duration) -> bool {
        {
            let mut window = self.window.lock();
            if window.samples.len() == window.capacity {
                window.samples.pop_front();
            }
            window.samples.push_back((Instant::now(), present_time));
        }
        let presented = self.frames_presented.fetch_add(1, Ordering::Relaxed) + 1;
        self.log_interval > 0 && presented % self.log_interval == 0
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented.load(Ordering::Relaxed)
    }

    pub fn loops(&self) -> u64 {
        self.loops.load(Ordering::Relaxed)
    }

    /// Get current metrics snapshot. Queue depths are filled in by the caller.
    pub fn snapshot(&self) -> PlaybackMetrics {
        let (fps, avg_present_ms) = {
            let window = self.window.lock();
            let fps = match (window.samples.front(), window.samples.back()) {
                (Some((first, _)), Some((last, _))) if window.samples.len() > 1 => {
                    let span = last.duration_since(*first).as_secs_f32();
                    if span > 0.0 {
                        (window.samples.len() - 1) as f32 / span
                    } else {
                        0.0
                    }
                }
                _ => 0.0,
            };
            let avg = if window.samples.is_empty() {
                0.0
            } else {
                let total: Duration = window.samples.iter().map(|(_, spent)| *spent).sum();
                total.as_secs_f32() * 1000.0 / window.samples.len() as f32
            };
            (fps, avg)
        };

        let uptime_seconds = self
            .start_time
            .read()
            .map(|s| s.elapsed().as_secs())
            .unwrap_or(0);

        PlaybackMetrics {
            fps,
            avg_present_ms,
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            frames_presented: self.frames_presented.load(Ordering::Relaxed),
            frames_late: self.frames_late.load(Ordering::Relaxed),
            audio_frames_played: self.audio_frames_played.load(Ordering::Relaxed),
            audio_frames_dropped: self.audio_frames_dropped.load(Ordering::Relaxed),
            audio_underruns: self.audio_underruns.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            loops: self.loops.load(Ordering::Relaxed),
            video_queue_len: 0,
            audio_queue_len: 0,
            uptime_seconds,
        }
    }
}

/// Write a metrics snapshot to the log.
pub fn log_metrics(metrics: &PlaybackMetrics) {
    info!(
        fps = %format!("{:.1}", metrics.fps),
        avg_present_ms = %format!("{:.2}", metrics.avg_present_ms),
        presented = metrics.frames_presented,
        late = metrics.frames_late,
        audio_dropped = metrics.audio_frames_dropped,
        underruns = metrics.audio_underruns,
        decode_errors = metrics.decode_errors,
        video_queue = metrics.video_queue_len,
        audio_queue = metrics.audio_queue_len,
        "Playback stats"
    );
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(120, 60)
    }
}
