//! Top-level player: startup, host loop and shutdown.

use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::Sender;
use tracing::{debug, error, info, instrument, warn};

use playout_ipc::{PlaybackMetrics, PlaybackState, PlayerConfig, PlayerEvent, StopReason};
use playout_media::FrameLedger;

use crate::controller::PlayerController;
use crate::error::PlayerError;
use crate::PlayerResult;
use crate::metrics::log_metrics;
use crate::outputs::OutputFactory;
use crate::presenter::TickOutcome;
use crate::shutdown::ShutdownSignal;
use crate::state::{PipelineShared, ResourceManager};

/// The looping media player.
///
/// Create it, call [`initialize`](Self::initialize), hand
/// [`controller`](Self::controller) to whatever accepts commands, then call
/// [`run`](Self::run) on the host thread until it returns.
pub struct Player {
    media: String,
    shared: PipelineShared,
    controller: Arc<PlayerController>,
    resource_manager: ResourceManager,
    outputs: Box<dyn OutputFactory>,
    shutdown: ShutdownSignal,
    finished: bool,
}

impl Player {
    pub fn new(
        media: impl Into<String>,
        config: PlayerConfig,
        outputs: Box<dyn OutputFactory>,
        event_tx: Sender<PlayerEvent>,
    ) -> Self {
        let shared = PipelineShared::new(config, event_tx);
        let controller = Arc::new(PlayerController::new(
            Arc::clone(&shared.flags),
            Arc::clone(&shared.video_queue),
            Arc::clone(&shared.audio_queue),
            shared.event_tx.clone(),
        ));

        Self {
            media: media.into(),
            resource_manager: ResourceManager::new(shared.clone()),
            shared,
            controller,
            outputs,
            shutdown: ShutdownSignal::new(),
            finished: false,
        }
    }

    pub fn controller(&self) -> Arc<PlayerController> {
        Arc::clone(&self.controller)
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn ledger(&self) -> Arc<FrameLedger> {
        Arc::clone(&self.shared.ledger)
    }

    pub fn state(&self) -> PlaybackState {
        self.controller.state()
    }

    /// Open the media and outputs and start decoding.
    ///
    /// On failure every completed phase is rolled back and the player is stopped.
    #[instrument(name = "player_initialize", skip(self))]
    pub fn initialize(&mut self) -> PlayerResult<()> {
        if self.controller.state() != PlaybackState::Initializing {
            return Err(PlayerError::AlreadyStarted);
        }

        info!(media = %self.media, "Starting player");
        match self
            .resource_manager
            .initialize(&self.media, self.outputs.as_ref())
        {
            Ok(()) => {
                self.shared.metrics.start();
                self.controller.mark_started();
                self.send_event(PlayerEvent::Ready);
                info!("Player started");
                Ok(())
            }
            Err(e) => {
                error!("Player start failed: {}", e);
                self.resource_manager.rollback();

                self.controller.begin_shutdown(StopReason::FatalError {
                    message: e.to_string(),
                });
                self.controller.finish_shutdown();
                self.finished = true;
                self.send_event(PlayerEvent::Error {
                    recoverable: false,
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Run the host loop (blocking) until stopped, then shut down.
    #[instrument(name = "player_run", skip(self))]
    pub fn run(&mut self) {
        let emit_interval = self.shared.config.metrics_emit_interval();
        let mut last_emit = Instant::now();

        loop {
            if self.shutdown.is_triggered() {
                self.controller.begin_shutdown(StopReason::Signal);
            }
            if self.resource_manager.decoder_exited() {
                self.controller.begin_shutdown(StopReason::FatalError {
                    message: "decoder thread exited".to_string(),
                });
            }
            if self.controller.refresh().is_terminal() {
                break;
            }

            let Some(presenter) = self.resource_manager.resources().presenter.as_mut() else {
                warn!("Host loop running without a presenter");
                self.controller.begin_shutdown(StopReason::FatalError {
                    message: "display is not initialized".to_string(),
                });
                continue;
            };

            if let TickOutcome::Presented {
                report_due: true, ..
            } = presenter.tick()
            {
                log_metrics(&self.snapshot());
            }

            if last_emit.elapsed() >= emit_interval {
                self.send_event(PlayerEvent::Metrics(self.snapshot()));
                last_emit = Instant::now();
            }
        }

        self.shutdown();
    }

    /// Current metrics including queue depths.
    pub fn snapshot(&self) -> PlaybackMetrics {
        let mut metrics = self.shared.metrics.snapshot();
        metrics.video_queue_len = self.shared.video_queue.len();
        metrics.audio_queue_len = self.shared.audio_queue.len();
        metrics
    }

    /// Release every resource. Safe to call more than once.
    #[instrument(name = "player_shutdown", skip(self))]
    pub fn shutdown(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        // A no-op if a stop command or signal got here first.
        self.controller.begin_shutdown(StopReason::RemoteCommand);
        self.resource_manager.shutdown();

        let final_metrics = self.snapshot();
        log_metrics(&final_metrics);
        self.shared.metrics.stop();

        let live = self.shared.ledger.live();
        if live > 0 {
            warn!(live, "Frames still alive after shutdown");
        } else {
            debug!(created = self.shared.ledger.created(), "Every frame released");
        }

        self.controller.finish_shutdown();
        self.send_event(PlayerEvent::Shutdown);
        info!("Player stopped");
    }

    fn send_event(&self, event: PlayerEvent) {
        if let Err(e) = self.shared.event_tx.try_send(event) {
            warn!("Failed to send event: {}", e);
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.shutdown();
    }
}
