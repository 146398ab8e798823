//! Producer thread: reads, decodes and queues frames.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use tracing::{debug, info, instrument, trace, warn};

use playout_ipc::PlayerEvent;
use playout_media::{
    BoundedFrameQueue, CompressedUnit, DecodeOutcome, Frame, FrameLedger, MediaSource,
    PushOutcome, ReadOutcome, StreamKind,
};

use crate::clock::SyncClock;
use crate::control::PlaybackFlags;
use crate::error::PlayerError;
use crate::PlayerResult;
use crate::metrics::MetricsCollector;

/// Longest wait on the control flags while paused.
const PAUSE_WAIT: Duration = Duration::from_millis(100);

/// Base delay between read retries; multiplied by the attempt number.
const READ_RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// Everything the decoder thread shares with the rest of the pipeline.
pub struct DecoderContext {
    pub video_queue: Arc<BoundedFrameQueue>,

    /// `None` when audio is not played; audio units are then discarded.
    pub audio_queue: Option<Arc<BoundedFrameQueue>>,

    pub flags: Arc<PlaybackFlags>,
    pub clock: Arc<SyncClock>,
    pub metrics: Arc<MetricsCollector>,
    pub ledger: Arc<FrameLedger>,
    pub event_tx: Sender<PlayerEvent>,

    /// Consecutive read failures tolerated before looping to the start.
    pub read_retry_attempts: u32,
}

enum Next {
    Unit(CompressedUnit),
    EndOfStream,
    Stopped,
}

/// The producer side of the pipeline.
///
/// Each iteration checks stop, then a pending seek, then pause, and only
/// then reads and decodes one unit. End of stream wraps to the start.
pub struct Decoder {
    source: Box<dyn MediaSource>,
    ctx: DecoderContext,
    sequence: u64,
}

impl Decoder {
    pub fn new(source: Box<dyn MediaSource>, ctx: DecoderContext) -> Self {
        Self {
            source,
            ctx,
            sequence: 0,
        }
    }

    /// Run the decoder on its own thread.
    pub fn spawn(self) -> PlayerResult<JoinHandle<()>> {
        thread::Builder::new()
            .name("decoder".to_string())
            .spawn(move || self.run())
            .map_err(|source| PlayerError::Thread {
                name: "decoder",
                source,
            })
    }

    /// Run until the stop flag is set.
    #[instrument(name = "decoder_run", skip(self))]
    pub fn run(mut self) {
        info!("Decoder starting");

        loop {
            if self.ctx.flags.is_stopped() {
                break;
            }

            if let Some((generation, target)) = self.ctx.flags.pending_seek() {
                self.seek(generation, target);
                continue;
            }

            if self.ctx.flags.is_paused() {
                self.ctx.flags.wait_for_change(PAUSE_WAIT);
                continue;
            }

            match self.read_unit() {
                Next::Unit(unit) => self.decode_and_queue(unit),
                Next::EndOfStream => self.loop_to_start(),
                Next::Stopped => break,
            }
        }

        info!(frames = self.sequence, "Decoder stopped");
    }

    fn read_unit(&mut self) -> Next {
        let mut failures = 0;
        loop {
            match self.source.read_next_unit() {
                Ok(ReadOutcome::Unit(unit)) => return Next::Unit(unit),
                Ok(ReadOutcome::EndOfStream) => return Next::EndOfStream,
                Err(e) => {
                    failures += 1;
                    if failures > self.ctx.read_retry_attempts {
                        warn!(failures, "Read keeps failing, treating as end of stream: {}", e);
                        return Next::EndOfStream;
                    }
                    debug!(attempt = failures, "Read failed, retrying: {}", e);

                    self.ctx.flags.wait_for_change(READ_RETRY_BACKOFF * failures);
                    if self.ctx.flags.is_stopped() {
                        return Next::Stopped;
                    }
                }
            }
        }
    }

    fn decode_and_queue(&mut self, unit: CompressedUnit) {
        if unit.kind == StreamKind::Audio && self.ctx.audio_queue.is_none() {
            return;
        }

        let decoded = match self.source.decode(unit) {
            Ok(DecodeOutcome::Frames(frames)) => frames,
            Ok(DecodeOutcome::NeedMoreInput) => return,
            Err(e) => {
                self.ctx.metrics.record_decode_error();
                warn!("Skipping unit that failed to decode: {}", e);
                return;
            }
        };

        for decoded in decoded {
            let frame = Frame::tracked(
                decoded.pts,
                self.sequence,
                decoded.payload,
                &self.ctx.ledger,
            );
            self.sequence += 1;

            if !self.queue(frame) {
                // Stopped or interrupted by a seek; the rest of this unit is stale.
                return;
            }
        }
    }

    // Returns false if the pipeline is stopping or a seek cut the push short.
    fn queue(&self, frame: Frame) -> bool {
        let kind = frame.kind();
        let sequence = frame.sequence();

        let queue = match kind {
            StreamKind::Video => &self.ctx.video_queue,
            StreamKind::Audio => match &self.ctx.audio_queue {
                Some(queue) => queue,
                None => return true,
            },
        };

        match queue.push(frame) {
            PushOutcome::Pushed => {
                if kind == StreamKind::Video {
                    self.ctx.metrics.record_decoded();
                }
                trace!(sequence, kind = kind.name(), "Queued frame");
                true
            }
            PushOutcome::Replaced => {
                self.ctx.metrics.record_audio_dropped();
                true
            }
            PushOutcome::Interrupted => {
                debug!(sequence, "Push interrupted by seek");
                false
            }
            PushOutcome::Stopped => false,
        }
    }

    fn seek(&mut self, generation: u64, target: Duration) {
        let dropped = self.flush_queues();
        self.source.flush();
        if let Err(e) = self.source.seek(target) {
            warn!(?target, "Seek failed: {}", e);
        }
        self.ctx.clock.reset();
        self.ctx.flags.acknowledge_seek(generation);

        info!(generation, ?target, dropped, "Seek complete");
    }

    fn loop_to_start(&mut self) {
        let iteration = self.ctx.metrics.record_loop();
        let dropped = self.flush_queues();
        self.source.flush();

        if let Err(e) = self.source.seek(Duration::ZERO) {
            warn!("Seek to start failed: {}", e);
            // Avoid spinning on a source that cannot rewind.
            self.ctx.flags.wait_for_change(PAUSE_WAIT);
        }
        self.ctx.clock.reset();

        info!(iteration, dropped, "End of stream, looping to start");
        if let Err(e) = self.ctx.event_tx.try_send(PlayerEvent::Looped { iteration }) {
            warn!("Failed to send event: {}", e);
        }
    }

    fn flush_queues(&self) -> usize {
        let video = self.ctx.video_queue.flush();
        let audio = self
            .ctx
            .audio_queue
            .as_ref()
            .map(|queue| queue.flush())
            .unwrap_or(0);
        video + audio
    }
}
