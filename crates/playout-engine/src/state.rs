//! Resource management and initialization tracking.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use tracing::{debug, info, instrument, warn};

use playout_audio::{AudioError, AudioOutput};
use playout_ipc::{PlayerConfig, PlayerEvent, ShutdownPhase, StartupPhase, Volume};
use playout_media::{
    open_source, BoundedFrameQueue, FrameLedger, LinearResampler, MediaSource, NearestScaler,
    OverflowPolicy, SourceOptions, StreamInfo,
};

use crate::audio_sink::AudioSink;
use crate::clock::{ClockSettings, MasterSource, SyncClock};
use crate::control::PlaybackFlags;
use crate::decoder::{Decoder, DecoderContext};
use crate::error::PlayerError;
use crate::PlayerResult;
use crate::metrics::MetricsCollector;
use crate::outputs::OutputFactory;
use crate::presenter::{Presenter, PresenterTiming};

/// Handles shared by every stage of the pipeline.
#[derive(Clone)]
pub struct PipelineShared {
    pub config: PlayerConfig,
    pub flags: Arc<PlaybackFlags>,
    pub video_queue: Arc<BoundedFrameQueue>,
    pub audio_queue: Arc<BoundedFrameQueue>,
    pub metrics: Arc<MetricsCollector>,
    pub ledger: Arc<FrameLedger>,
    pub event_tx: Sender<PlayerEvent>,
}

impl PipelineShared {
    pub fn new(config: PlayerConfig, event_tx: Sender<PlayerEvent>) -> Self {
        let flags = PlaybackFlags::new(Volume::clamped(i64::from(config.initial_volume)));
        let video_queue =
            BoundedFrameQueue::new("video", config.video_queue_capacity, OverflowPolicy::Block);
        let audio_queue = BoundedFrameQueue::new(
            "audio",
            config.audio_queue_capacity,
            OverflowPolicy::DropOldest,
        );
        let metrics =
            MetricsCollector::new(config.metrics_window, config.metrics_log_interval_frames);

        Self {
            config,
            flags: Arc::new(flags),
            video_queue: Arc::new(video_queue),
            audio_queue: Arc::new(audio_queue),
            metrics: Arc::new(metrics),
            ledger: FrameLedger::new(),
            event_tx,
        }
    }
}

/// Resources that have been initialized during startup.
#[derive(Default)]
pub struct InitializedResources {
    /// Media source; moved into the decoder thread when it starts.
    pub source: Option<Box<dyn MediaSource>>,

    /// Stream layout found when the source was opened.
    pub info: Option<StreamInfo>,

    pub clock: Option<Arc<SyncClock>>,

    /// Running audio output, absent when there is no audio to play.
    pub audio_output: Option<Box<dyn AudioOutput>>,

    pub presenter: Option<Presenter>,

    pub decoder_thread: Option<JoinHandle<()>>,
}

/// Manages resource initialization and cleanup.
///
/// Startup walks [`StartupPhase`]s in order. A failure rolls back every
/// completed phase in reverse; shutdown walks [`ShutdownPhase`]s.
pub struct ResourceManager {
    shared: PipelineShared,
    resources: InitializedResources,
    current_phase: Option<StartupPhase>,
}

impl ResourceManager {
    pub fn new(shared: PipelineShared) -> Self {
        Self {
            shared,
            resources: InitializedResources::default(),
            current_phase: None,
        }
    }

    /// Initialize every phase for `media`.
    ///
    /// On error the failed phase is reported and nothing is rolled back
    /// yet; the caller decides when to call [`rollback`](Self::rollback).
    #[instrument(name = "init_resources", skip(self, outputs))]
    pub fn initialize(
        &mut self,
        media: &str,
        outputs: &dyn OutputFactory,
    ) -> PlayerResult<()> {
        let mut phase = StartupPhase::FIRST;

        loop {
            self.current_phase = Some(phase);
            self.init_phase(phase, media, outputs)
                .map_err(|e| PlayerError::Startup {
                    phase,
                    source: Box::new(e),
                })?;

            match phase.next() {
                Some(next) => phase = next,
                None => break,
            }
        }

        Ok(())
    }

    fn init_phase(
        &mut self,
        phase: StartupPhase,
        media: &str,
        outputs: &dyn OutputFactory,
    ) -> PlayerResult<()> {
        info!("Initializing phase: {}", phase.name());

        match phase {
            StartupPhase::OpenSource => self.init_source(media),
            StartupPhase::InitAudio => self.init_audio(outputs),
            StartupPhase::InitDisplay => self.init_display(outputs),
            StartupPhase::StartDecoder => self.start_decoder(),
        }
    }

    fn init_source(&mut self, media: &str) -> PlayerResult<()> {
        let config = &self.shared.config;
        let options = SourceOptions {
            decode_audio: config.audio_enabled,
        };
        let source = open_source(media, &options)?;
        let info = source.info().clone();

        let has_audio = config.audio_enabled && info.audio.is_some();
        let frame_interval = info.frame_interval(config.fallback_fps);
        let clock = SyncClock::new(
            MasterSource::for_streams(has_audio),
            ClockSettings::from_config(config, frame_interval),
        );

        info!(
            media,
            width = info.video.width,
            height = info.video.height,
            fps = ?info.video.frame_rate,
            audio = has_audio,
            master = ?clock.master(),
            "Opened media"
        );

        self.resources.source = Some(source);
        self.resources.info = Some(info);
        self.resources.clock = Some(Arc::new(clock));
        Ok(())
    }

    fn init_audio(&mut self, outputs: &dyn OutputFactory) -> PlayerResult<()> {
        let clock = self.clock()?;
        if clock.master() != MasterSource::Audio {
            debug!("No audio to play, skipping audio output");
            return Ok(());
        }

        let mut output = outputs.open_audio(&self.shared.config)?;
        let sink = AudioSink::new(
            Arc::clone(&self.shared.audio_queue),
            clock,
            Arc::clone(&self.shared.flags),
            Arc::clone(&self.shared.metrics),
            Box::new(LinearResampler::new()),
            output.spec(),
        );
        output.start(sink.into_callback())?;

        self.resources.audio_output = Some(output);
        debug!("Audio initialized");
        Ok(())
    }

    fn init_display(&mut self, outputs: &dyn OutputFactory) -> PlayerResult<()> {
        let clock = self.clock()?;
        let info = self
            .resources
            .info
            .as_ref()
            .ok_or(PlayerError::NotInitialized("media source"))?;

        let display = outputs.open_display(&info.video)?;
        let presenter = Presenter::new(
            Arc::clone(&self.shared.video_queue),
            clock,
            Arc::clone(&self.shared.flags),
            Arc::clone(&self.shared.metrics),
            display,
            Box::new(NearestScaler),
            PresenterTiming::from(&self.shared.config),
        );

        self.resources.presenter = Some(presenter);
        debug!("Display initialized");
        Ok(())
    }

    fn start_decoder(&mut self) -> PlayerResult<()> {
        let clock = self.clock()?;
        let source = self.resources.source.take().ok_or(PlayerError::AlreadyStarted)?;

        let audio_queue = (clock.master() == MasterSource::Audio)
            .then(|| Arc::clone(&self.shared.audio_queue));
        let ctx = DecoderContext {
            video_queue: Arc::clone(&self.shared.video_queue),
            audio_queue,
            flags: Arc::clone(&self.shared.flags),
            clock,
            metrics: Arc::clone(&self.shared.metrics),
            ledger: Arc::clone(&self.shared.ledger),
            event_tx: self.shared.event_tx.clone(),
            read_retry_attempts: self.shared.config.read_retry_attempts,
        };

        self.resources.decoder_thread = Some(Decoder::new(source, ctx).spawn()?);
        debug!("Decoder started");
        Ok(())
    }

    fn clock(&self) -> PlayerResult<Arc<SyncClock>> {
        self.resources
            .clock
            .clone()
            .ok_or(PlayerError::NotInitialized("sync clock"))
    }

    /// Rollback resources from the current phase backwards.
    #[instrument(name = "rollback_resources", skip(self))]
    pub fn rollback(&mut self) {
        if let Some(mut phase) = self.current_phase {
            loop {
                info!("Rolling back phase: {}", phase.name());
                self.rollback_phase(phase);

                match phase.previous() {
                    Some(prev) => phase = prev,
                    None => break,
                }
            }
        }

        self.current_phase = None;
    }

    fn rollback_phase(&mut self, phase: StartupPhase) {
        match phase {
            StartupPhase::StartDecoder => self.stop_decoder(),
            StartupPhase::InitDisplay => self.close_display(),
            StartupPhase::InitAudio => self.close_audio(),
            StartupPhase::OpenSource => {
                self.resources.source = None;
                self.resources.info = None;
                self.resources.clock = None;
            }
        }
    }

    /// Release everything in shutdown order.
    #[instrument(name = "shutdown_resources", skip(self))]
    pub fn shutdown(&mut self) {
        if self.current_phase.is_none() {
            return;
        }
        info!("Shutting down all resources");

        let mut phase = Some(ShutdownPhase::StopDecoder);
        while let Some(current) = phase {
            debug!("Shutdown phase: {}", current.name());
            match current {
                ShutdownPhase::StopDecoder => self.stop_decoder(),
                ShutdownPhase::FlushQueues => {
                    let dropped = self.shared.video_queue.flush() + self.shared.audio_queue.flush();
                    debug!(dropped, "Queues flushed");
                }
                ShutdownPhase::CloseAudio => self.close_audio(),
                ShutdownPhase::CloseDisplay => self.close_display(),
            }
            phase = current.next();
        }

        self.rollback_phase(StartupPhase::OpenSource);
        self.current_phase = None;
    }

    fn stop_decoder(&mut self) {
        // Normally already done by the controller; needed when startup fails.
        self.shared.flags.request_stop();
        self.shared.video_queue.stop();
        self.shared.audio_queue.stop();

        if let Some(handle) = self.resources.decoder_thread.take() {
            if handle.join().is_err() {
                warn!("Decoder thread panicked");
            }
        }
    }

    fn close_audio(&mut self) {
        if let Some(mut output) = self.resources.audio_output.take() {
            match output.stop() {
                Ok(()) | Err(AudioError::NotStarted) => {}
                Err(e) => warn!("Failed to stop audio output: {}", e),
            }
        }
    }

    fn close_display(&mut self) {
        if let Some(mut presenter) = self.resources.presenter.take() {
            presenter.close();
        }
    }

    /// Get a reference to the resources (for the host loop).
    pub fn resources(&mut self) -> &mut InitializedResources {
        &mut self.resources
    }

    /// True once the decoder thread has exited on its own.
    pub fn decoder_exited(&self) -> bool {
        self.resources
            .decoder_thread
            .as_ref()
            .is_some_and(|handle| handle.is_finished())
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
