//! Audio output backends.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument};

use playout_media::OutputSpec;

use crate::error::AudioError;
use crate::AudioResult;

/// The device callback. Fills an interleaved f32 buffer and must not block.
pub type AudioCallback = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

/// An audio device that pulls samples through a callback.
pub trait AudioOutput {
    /// Format the device expects.
    fn spec(&self) -> OutputSpec;

    /// Start pulling samples.
    fn start(&mut self, callback: AudioCallback) -> AudioResult<()>;

    /// Stop pulling samples. The callback is dropped once this returns.
    fn stop(&mut self) -> AudioResult<()>;

    /// Returns true while the callback is being driven.
    fn is_running(&self) -> bool;
}

/// An output with no device behind it.
///
/// A thread invokes the callback at device cadence and discards the
/// samples, so the audio clock advances in real time.
pub struct HeadlessOutput {
    spec: OutputSpec,
    buffer_frames: usize,
    thread: Option<JoinHandle<()>>,
    should_stop: Arc<AtomicBool>,
    callbacks: Arc<AtomicU64>,
}

impl HeadlessOutput {
    /// Create a headless output delivering `buffer_frames` per callback.
    pub fn new(spec: OutputSpec, buffer_frames: usize) -> Self {
        Self {
            spec,
            buffer_frames: buffer_frames.max(1),
            thread: None,
            should_stop: Arc::new(AtomicBool::new(false)),
            callbacks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of callbacks invoked so far.
    pub fn callbacks(&self) -> u64 {
        self.callbacks.load(Ordering::Relaxed)
    }

    /// Shared callback counter.
    pub fn callback_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.callbacks)
    }
}

impl AudioOutput for HeadlessOutput {
    fn spec(&self) -> OutputSpec {
        self.spec
    }

    #[instrument(name = "headless_audio_start", skip(self, callback))]
    fn start(&mut self, mut callback: AudioCallback) -> AudioResult<()> {
        if self.thread.is_some() {
            return Err(AudioError::AlreadyStarted);
        }

        let channels = usize::from(self.spec.channels.max(1));
        let rate = self.spec.sample_rate.max(1);
        let buffer_len = self.buffer_frames * channels;
        let period = Duration::from_secs_f64(self.buffer_frames as f64 / f64::from(rate));

        let should_stop = Arc::clone(&self.should_stop);
        should_stop.store(false, Ordering::SeqCst);
        let callbacks = Arc::clone(&self.callbacks);

        info!(
            sample_rate = rate,
            channels,
            buffer_frames = self.buffer_frames,
            "Starting headless audio output"
        );

        let handle = thread::Builder::new()
            .name("audio-headless".to_string())
            .spawn(move || {
                let mut buffer = vec![0.0f32; buffer_len];
                let mut next_tick = Instant::now();

                while !should_stop.load(Ordering::SeqCst) {
                    callback(&mut buffer);
                    callbacks.fetch_add(1, Ordering::Relaxed);

                    next_tick += period;
                    let now = Instant::now();
                    if next_tick > now {
                        thread::sleep(next_tick - now);
                    } else {
                        next_tick = now;
                    }
                }
                debug!("Headless audio thread exiting");
            })?;

        self.thread = Some(handle);
        Ok(())
    }

    #[instrument(name = "headless_audio_stop", skip(self))]
    fn stop(&mut self) -> AudioResult<()> {
        self.should_stop.store(true, Ordering::SeqCst);
        match self.thread.take() {
            Some(handle) => {
                let _ = handle.join();
                info!("Headless audio output stopped");
                Ok(())
            }
            None => Err(AudioError::NotStarted),
        }
    }

    fn is_running(&self) -> bool {
        self.thread.is_some()
    }
}

impl Drop for HeadlessOutput {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.stop();
        }
    }
}
