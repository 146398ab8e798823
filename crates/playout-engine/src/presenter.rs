//! Video consumer driven by the host loop.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use playout_ipc::PlayerConfig;
use playout_media::{BoundedFrameQueue, Frame, Scaler};

use crate::clock::SyncClock;
use crate::control::PlaybackFlags;
use crate::display::VideoOutput;
use crate::error::PlayerError;
use crate::metrics::MetricsCollector;
use crate::PlayerResult;

/// Sleeps used by [`Presenter::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenterTiming {
    /// Sleep per tick while paused or stopping.
    pub idle_sleep: Duration,

    /// Sleep per tick when no frame is queued.
    pub starve_sleep: Duration,

    /// Longest single wait for the clock. Keeps the host loop responsive.
    pub max_sleep: Duration,
}

impl From<&PlayerConfig> for PresenterTiming {
    fn from(config: &PlayerConfig) -> Self {
        Self {
            idle_sleep: config.idle_sleep(),
            starve_sleep: config.starve_sleep(),
            max_sleep: config.max_present_sleep(),
        }
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// Paused or stopping; nothing was popped.
    Idle,

    /// A frame reached the display.
    Presented {
        /// Its pts in seconds.
        pts: f64,

        /// Older frames discarded to catch up with audio.
        skipped: u64,

        /// A periodic metrics report is due.
        report_due: bool,
    },

    /// The next frame is not due yet; it is held for a later tick.
    Waiting {
        /// Its pts in seconds.
        pts: f64,
    },

    /// The display refused the frame; it was dropped.
    Dropped,

    /// The video queue was empty.
    Starved,
}

/// A popped frame that is not due yet.
struct PendingFrame {
    frame: Frame,
    /// Clock epoch the frame was taken in. A seek makes it stale.
    epoch: u64,
    /// When to present it if video is not following audio.
    due: Instant,
}

/// Pops video frames, waits on the [`SyncClock`] and hands them to a [`VideoOutput`].
///
/// `tick` never blocks longer than the bounded sleeps in [`PresenterTiming`].
/// A frame that needs a longer wait is held and re-checked on the next tick,
/// so video never runs ahead of the master clock.
pub struct Presenter {
    queue: Arc<BoundedFrameQueue>,
    clock: Arc<SyncClock>,
    flags: Arc<PlaybackFlags>,
    metrics: Arc<MetricsCollector>,
    output: Box<dyn VideoOutput>,
    scaler: Box<dyn Scaler>,
    timing: PresenterTiming,
    pending: Option<PendingFrame>,
}

impl Presenter {
    pub fn new(
        queue: Arc<BoundedFrameQueue>,
        clock: Arc<SyncClock>,
        flags: Arc<PlaybackFlags>,
        metrics: Arc<MetricsCollector>,
        output: Box<dyn VideoOutput>,
        scaler: Box<dyn Scaler>,
        timing: PresenterTiming,
    ) -> Self {
        Self {
            queue,
            clock,
            flags,
            metrics,
            output,
            scaler,
            timing,
            pending: None,
        }
    }

    /// Run one iteration of the presentation loop.
    pub fn tick(&mut self) -> TickOutcome {
        if self.flags.is_stopped() || self.flags.is_paused() {
            thread::sleep(self.timing.idle_sleep);
            return TickOutcome::Idle;
        }

        let Some(mut pending) = self.take_frame() else {
            thread::sleep(self.timing.starve_sleep);
            return TickOutcome::Starved;
        };

        let now = Instant::now();
        let decision = self
            .clock
            .delay_for_next_video_frame(pending.frame.pts_seconds());
        let mut skipped = 0;
        if decision.catch_up {
            while let Some(newer) = self.queue.try_pop() {
                pending.frame = newer;
                skipped += 1;
            }
            self.metrics.record_late(skipped);
            debug!(
                skipped,
                pts = pending.frame.pts_seconds(),
                audio = self.clock.audio_clock(),
                "Video far behind audio, skipping ahead"
            );
        } else {
            // Audio moves on its own, so the wait is re-measured every tick.
            if self.clock.is_audio_driven() {
                pending.due = now + decision.delay;
            }
            let wait = pending.due.saturating_duration_since(now);
            if wait > self.timing.max_sleep {
                thread::sleep(self.timing.max_sleep);
                let pts = pending.frame.pts_seconds();
                self.pending = Some(pending);
                return TickOutcome::Waiting { pts };
            }
            if !wait.is_zero() {
                thread::sleep(wait);
            }
        }

        let frame = pending.frame;
        let started = Instant::now();
        let pts = frame.pts_seconds();
        match self.present(&frame) {
            Ok(()) => {
                self.clock.update_video(pts);
                let report_due = self.metrics.record_presented(started.elapsed());
                trace!(sequence = frame.sequence(), pts, "Presented frame");
                TickOutcome::Presented {
                    pts,
                    skipped,
                    report_due,
                }
            }
            Err(e) => {
                warn!(sequence = frame.sequence(), "Dropping frame: {}", e);
                TickOutcome::Dropped
            }
        }
    }

    /// Close the display. Called once during shutdown.
    pub fn close(&mut self) {
        self.pending = None;
        self.output.close();
    }

    /// The held frame if it is still current, otherwise the next queued one.
    fn take_frame(&mut self) -> Option<PendingFrame> {
        let epoch = self.clock.epoch();
        match self.pending.take() {
            Some(pending) if pending.epoch == epoch => return Some(pending),
            Some(stale) => {
                debug!(
                    sequence = stale.frame.sequence(),
                    "Discarding held frame from before the seek"
                );
            }
            None => {}
        }

        let frame = self.queue.try_pop()?;
        let decision = self.clock.delay_for_next_video_frame(frame.pts_seconds());
        Some(PendingFrame {
            frame,
            epoch,
            due: Instant::now() + decision.delay,
        })
    }

    fn present(&mut self, frame: &Frame) -> PlayerResult<()> {
        let buffer = frame
            .video()
            .ok_or_else(|| PlayerError::Display("audio frame in the video queue".to_string()))?;

        let (width, height) = self.output.size();
        if buffer.width == width && buffer.height == height {
            return self.output.present(buffer);
        }

        let scaled = self.scaler.scale(buffer, width, height)?;
        self.output.present(&scaled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicU64, Ordering};

    use playout_media::{
        FrameLedger, FramePayload, NearestScaler, OverflowPolicy, Rational, Timestamp, VideoBuffer,
    };

    use crate::clock::{ClockSettings, MasterSource};
    use crate::display::HeadlessDisplay;

    struct Fixture {
        presenter: Presenter,
        queue: Arc<BoundedFrameQueue>,
        clock: Arc<SyncClock>,
        flags: Arc<PlaybackFlags>,
        metrics: Arc<MetricsCollector>,
        presented: Arc<AtomicU64>,
        ledger: Arc<FrameLedger>,
    }

    fn fixture(master: MasterSource) -> Fixture {
        let queue = Arc::new(BoundedFrameQueue::new("video", 8, OverflowPolicy::Block));
        let settings = ClockSettings {
            frame_interval: Duration::from_millis(5),
            ..Default::default()
        };
        let clock = Arc::new(SyncClock::new(master, settings));
        let flags = Arc::new(PlaybackFlags::default());
        let metrics = Arc::new(MetricsCollector::new(16, 0));
        let display = HeadlessDisplay::new(4, 4);
        let presented = display.presented_counter();

        let presenter = Presenter::new(
            Arc::clone(&queue),
            Arc::clone(&clock),
            Arc::clone(&flags),
            Arc::clone(&metrics),
            Box::new(display),
            Box::new(NearestScaler),
            PresenterTiming {
                idle_sleep: Duration::from_millis(1),
                starve_sleep: Duration::from_millis(1),
                max_sleep: Duration::from_millis(20),
            },
        );

        Fixture {
            presenter,
            queue,
            clock,
            flags,
            metrics,
            presented,
            ledger: FrameLedger::new(),
        }
    }

    fn video_frame(ledger: &Arc<FrameLedger>, sequence: u64, pts_ms: i64, size: u32) -> Frame {
        let buffer = VideoBuffer::packed(
            Bytes::from(vec![0u8; VideoBuffer::rgba_buffer_size(size, size)]),
            size,
            size,
        );
        Frame::tracked(
            Timestamp::new(pts_ms, Rational::new(1, 1000)),
            sequence,
            FramePayload::Video(buffer),
            ledger,
        )
    }

    fn assert_waiting(outcome: TickOutcome, expected_pts: f64) {
        match outcome {
            TickOutcome::Waiting { pts } => assert!((pts - expected_pts).abs() < 1e-9),
            other => panic!("expected the frame to be held, got {other:?}"),
        }
    }

    #[test]
    fn test_presents_and_updates_clock() {
        let mut f = fixture(MasterSource::WallClock);
        f.queue.push(video_frame(&f.ledger, 0, 40, 4));

        match f.presenter.tick() {
            TickOutcome::Presented { pts, skipped, .. } => {
                assert!((pts - 0.04).abs() < 1e-9);
                assert_eq!(skipped, 0);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!((f.clock.video_clock() - 0.04).abs() < 1e-9);
        assert_eq!(f.presented.load(Ordering::Relaxed), 1);
        assert_eq!(f.metrics.frames_presented(), 1);
        assert_eq!(f.ledger.live(), 0);
    }

    #[test]
    fn test_starved_when_empty() {
        let mut f = fixture(MasterSource::WallClock);
        assert_eq!(f.presenter.tick(), TickOutcome::Starved);
    }

    #[test]
    fn test_idle_while_paused() {
        let mut f = fixture(MasterSource::WallClock);
        f.queue.push(video_frame(&f.ledger, 0, 0, 4));
        f.flags.set_paused(true);

        assert_eq!(f.presenter.tick(), TickOutcome::Idle);
        assert_eq!(f.queue.len(), 1);
    }

    #[test]
    fn test_scales_to_output_size() {
        let mut f = fixture(MasterSource::WallClock);
        f.queue.push(video_frame(&f.ledger, 0, 0, 8));

        assert!(matches!(f.presenter.tick(), TickOutcome::Presented { .. }));
        assert_eq!(f.presented.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_catch_up_skips_to_newest() {
        let mut f = fixture(MasterSource::Audio);
        f.clock.update_audio(f.clock.epoch(), 60.0);
        for (sequence, pts_ms) in [(0, 1_000), (1, 1_040), (2, 1_080)] {
            f.queue.push(video_frame(&f.ledger, sequence, pts_ms, 4));
        }

        match f.presenter.tick() {
            TickOutcome::Presented { pts, skipped, .. } => {
                assert!((pts - 1.08).abs() < 1e-9);
                assert_eq!(skipped, 2);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(f.queue.is_empty());
        assert_eq!(f.metrics.snapshot().frames_late, 2);
        assert_eq!(f.ledger.live(), 0);
    }

    #[test]
    fn test_wait_is_bounded() {
        let mut f = fixture(MasterSource::Audio);
        f.clock.update_audio(f.clock.epoch(), 0.0);
        f.queue.push(video_frame(&f.ledger, 0, 5_000, 4));

        let start = Instant::now();
        assert_waiting(f.presenter.tick(), 5.0);
        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(f.ledger.live(), 1);
    }

    #[test]
    fn test_frame_ahead_of_audio_is_held() {
        let mut f = fixture(MasterSource::Audio);
        f.clock.update_audio(f.clock.epoch(), 0.0);
        for (sequence, pts_ms) in [(0, 1_000), (1, 1_040), (2, 1_080)] {
            f.queue.push(video_frame(&f.ledger, sequence, pts_ms, 4));
        }

        for _ in 0..5 {
            assert_waiting(f.presenter.tick(), 1.0);
        }
        assert_eq!(f.presented.load(Ordering::Relaxed), 0);
        assert_eq!(f.queue.len(), 2);

        // Audio catches up; the held frame goes out first.
        f.clock.update_audio(f.clock.epoch(), 1.0);
        match f.presenter.tick() {
            TickOutcome::Presented { pts, skipped, .. } => {
                assert!((pts - 1.0).abs() < 1e-9);
                assert_eq!(skipped, 0);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(f.presented.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_held_frame_discarded_after_seek() {
        let mut f = fixture(MasterSource::Audio);
        f.clock.update_audio(f.clock.epoch(), 0.0);
        f.queue.push(video_frame(&f.ledger, 0, 4_000, 4));
        assert!(matches!(f.presenter.tick(), TickOutcome::Waiting { .. }));

        f.clock.reset();
        f.queue.push(video_frame(&f.ledger, 1, 0, 4));
        match f.presenter.tick() {
            TickOutcome::Presented { pts, .. } => assert_eq!(pts, 0.0),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(f.ledger.live(), 0);
    }

    #[test]
    fn test_wall_clock_interval_longer_than_max_sleep() {
        let mut f = fixture(MasterSource::WallClock);
        f.presenter.timing.max_sleep = Duration::from_millis(2);
        f.queue.push(video_frame(&f.ledger, 0, 0, 4));

        // 5 ms interval, 2 ms per tick.
        let mut ticks = 0;
        loop {
            ticks += 1;
            match f.presenter.tick() {
                TickOutcome::Waiting { .. } => assert!(ticks < 10),
                TickOutcome::Presented { .. } => break,
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert!(ticks >= 2);
    }

    #[test]
    fn test_close_releases_held_frame() {
        let mut f = fixture(MasterSource::Audio);
        f.clock.update_audio(f.clock.epoch(), 0.0);
        f.queue.push(video_frame(&f.ledger, 0, 2_000, 4));
        assert!(matches!(f.presenter.tick(), TickOutcome::Waiting { .. }));

        f.presenter.close();
        assert_eq!(f.ledger.live(), 0);
    }

    #[test]
    fn test_drops_audio_payload() {
        let mut f = fixture(MasterSource::WallClock);
        let frame = Frame::tracked(
            Timestamp::new(0, Rational::new(1, 1000)),
            0,
            FramePayload::Audio(playout_media::AudioBuffer {
                samples: vec![0.0; 2],
                sample_rate: 48_000,
                channels: 2,
            }),
            &f.ledger,
        );
        f.queue.push(frame);

        assert_eq!(f.presenter.tick(), TickOutcome::Dropped);
        assert_eq!(f.ledger.live(), 0);
    }
}
