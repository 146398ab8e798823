//! Audio consumer run inside the device callback.

use std::sync::Arc;

use tracing::warn;

use playout_audio::{mix_into, AudioCallback};
use playout_media::{BoundedFrameQueue, OutputSpec, Resampler};

use crate::clock::SyncClock;
use crate::control::PlaybackFlags;
use crate::metrics::MetricsCollector;

/// Fills device buffers from the audio queue and drives the audio clock.
///
/// `fill` never blocks: it only uses `try_pop`, and converted samples that
/// do not fit in one buffer are carried into the next.
pub struct AudioSink {
    queue: Arc<BoundedFrameQueue>,
    clock: Arc<SyncClock>,
    flags: Arc<PlaybackFlags>,
    metrics: Arc<MetricsCollector>,
    resampler: Box<dyn Resampler>,
    spec: OutputSpec,
    pending: Vec<f32>,
    consumed: usize,
    pending_pts: f64,
    epoch: u64,
}

impl AudioSink {
    pub fn new(
        queue: Arc<BoundedFrameQueue>,
        clock: Arc<SyncClock>,
        flags: Arc<PlaybackFlags>,
        metrics: Arc<MetricsCollector>,
        resampler: Box<dyn Resampler>,
        spec: OutputSpec,
    ) -> Self {
        let epoch = clock.epoch();
        Self {
            queue,
            clock,
            flags,
            metrics,
            resampler,
            spec,
            pending: Vec::with_capacity(8192),
            consumed: 0,
            pending_pts: 0.0,
            epoch,
        }
    }

    /// Wrap the sink as a device callback.
    pub fn into_callback(mut self) -> AudioCallback {
        Box::new(move |buffer: &mut [f32]| self.fill(buffer))
    }

    /// Fill one interleaved device buffer.
    pub fn fill(&mut self, out: &mut [f32]) {
        out.fill(0.0);

        let epoch = self.clock.epoch();
        if epoch != self.epoch {
            // Samples converted before a seek or loop must not be heard after it.
            self.pending.clear();
            self.consumed = 0;
            self.resampler.reset();
            self.epoch = epoch;
        }

        if self.flags.is_paused() || self.flags.is_stopped() {
            return;
        }

        let gain = self.flags.volume().gain();
        let channels = usize::from(self.spec.channels.max(1));
        let rate = f64::from(self.spec.sample_rate.max(1));

        let mut written = 0;
        let mut position = None;
        while written < out.len() {
            if self.consumed >= self.pending.len() && !self.refill() {
                self.metrics.record_underrun();
                break;
            }

            let count = (out.len() - written).min(self.pending.len() - self.consumed);
            mix_into(
                &mut out[written..written + count],
                &self.pending[self.consumed..self.consumed + count],
                gain,
            );
            written += count;
            self.consumed += count;
            position = Some(self.pending_pts + (self.consumed / channels) as f64 / rate);
        }

        if let Some(seconds) = position {
            self.clock.update_audio(epoch, seconds);
        }
    }

    // Convert the next queued frame into `pending`. Returns false if none is queued.
    fn refill(&mut self) -> bool {
        while let Some(frame) = self.queue.try_pop() {
            let Some(buffer) = frame.audio() else {
                continue;
            };

            self.pending.clear();
            self.consumed = 0;
            if let Err(e) = self.resampler.resample(buffer, self.spec, &mut self.pending) {
                warn!(sequence = frame.sequence(), "Dropping audio frame: {}", e);
                continue;
            }

            self.metrics.record_audio_played();
            if self.pending.is_empty() {
                continue;
            }
            self.pending_pts = frame.pts_seconds();
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playout_ipc::Volume;
    use playout_media::{
        AudioBuffer, Frame, FrameLedger, FramePayload, LinearResampler, OverflowPolicy, Rational,
        Timestamp,
    };

    use crate::clock::{ClockSettings, MasterSource};

    struct Fixture {
        sink: AudioSink,
        queue: Arc<BoundedFrameQueue>,
        clock: Arc<SyncClock>,
        flags: Arc<PlaybackFlags>,
        metrics: Arc<MetricsCollector>,
        ledger: Arc<FrameLedger>,
    }

    const SPEC: OutputSpec = OutputSpec {
        sample_rate: 1000,
        channels: 2,
    };

    fn fixture() -> Fixture {
        let queue = Arc::new(BoundedFrameQueue::new("audio", 8, OverflowPolicy::DropOldest));
        let clock = Arc::new(SyncClock::new(MasterSource::Audio, ClockSettings::default()));
        let flags = Arc::new(PlaybackFlags::new(Volume::MAX));
        let metrics = Arc::new(MetricsCollector::default());
        let sink = AudioSink::new(
            Arc::clone(&queue),
            Arc::clone(&clock),
            Arc::clone(&flags),
            Arc::clone(&metrics),
            Box::new(LinearResampler::new()),
            SPEC,
        );
        Fixture {
            sink,
            queue,
            clock,
            flags,
            metrics,
            ledger: FrameLedger::new(),
        }
    }

    // `frames` stereo frames at 1 kHz, all samples set to `level`.
    fn audio_frame(ledger: &Arc<FrameLedger>, pts_ms: i64, frames: usize, level: f32) -> Frame {
        Frame::tracked(
            Timestamp::new(pts_ms, Rational::new(1, 1000)),
            0,
            FramePayload::Audio(AudioBuffer {
                samples: vec![level; frames * 2],
                sample_rate: 1000,
                channels: 2,
            }),
            ledger,
        )
    }

    #[test]
    fn test_fills_and_advances_clock() {
        let mut f = fixture();
        f.queue.push(audio_frame(&f.ledger, 500, 10, 0.5));

        let mut buffer = vec![1.0; 8];
        f.sink.fill(&mut buffer);

        assert!(buffer.iter().all(|s| *s == 0.5));
        assert!((f.clock.audio_clock() - 0.504).abs() < 1e-9);
        assert!(f.clock.has_audio());
        assert_eq!(f.ledger.live(), 0);
    }

    #[test]
    fn test_leftover_carries_to_next_callback() {
        let mut f = fixture();
        f.queue.push(audio_frame(&f.ledger, 0, 6, 0.25));

        let mut first = vec![0.0; 8];
        f.sink.fill(&mut first);
        let mut second = vec![0.0; 8];
        f.sink.fill(&mut second);

        assert!(first.iter().all(|s| *s == 0.25));
        assert_eq!(&second[..4], &[0.25; 4]);
        assert_eq!(&second[4..], &[0.0; 4]);
        assert!((f.clock.audio_clock() - 0.006).abs() < 1e-9);
        assert_eq!(f.metrics.snapshot().audio_underruns, 1);
    }

    #[test]
    fn test_underrun_outputs_silence() {
        let mut f = fixture();
        let mut buffer = vec![0.7; 16];
        f.sink.fill(&mut buffer);

        assert!(buffer.iter().all(|s| *s == 0.0));
        assert!(!f.clock.has_audio());
        assert_eq!(f.metrics.snapshot().audio_underruns, 1);
    }

    #[test]
    fn test_paused_is_silent_and_keeps_queue() {
        let mut f = fixture();
        f.queue.push(audio_frame(&f.ledger, 0, 10, 0.5));
        f.flags.set_paused(true);

        let mut buffer = vec![0.3; 8];
        f.sink.fill(&mut buffer);

        assert!(buffer.iter().all(|s| *s == 0.0));
        assert_eq!(f.queue.len(), 1);
        assert!(!f.clock.has_audio());
    }

    #[test]
    fn test_volume_scales_output() {
        let mut f = fixture();
        f.flags.volume().set(Volume::clamped(50));
        f.queue.push(audio_frame(&f.ledger, 0, 4, 0.8));

        let mut buffer = vec![0.0; 8];
        f.sink.fill(&mut buffer);
        assert!(buffer.iter().all(|s| (*s - 0.4).abs() < 1e-6));
    }

    #[test]
    fn test_epoch_change_discards_pending() {
        let mut f = fixture();
        f.queue.push(audio_frame(&f.ledger, 0, 100, 0.5));

        let mut buffer = vec![0.0; 8];
        f.sink.fill(&mut buffer);
        f.clock.reset();
        f.queue.push(audio_frame(&f.ledger, 0, 4, 0.1));

        f.sink.fill(&mut buffer);
        assert!(buffer.iter().all(|s| (*s - 0.1).abs() < 1e-6));
        assert!((f.clock.audio_clock() - 0.004).abs() < 1e-9);
    }

    #[test]
    fn test_callback_wrapper() {
        let f = fixture();
        f.queue.push(audio_frame(&f.ledger, 0, 4, 0.2));
        let mut callback = f.sink.into_callback();

        let mut buffer = vec![0.0; 8];
        callback(&mut buffer);
        assert!(buffer.iter().all(|s| (*s - 0.2).abs() < 1e-6));
    }
}
