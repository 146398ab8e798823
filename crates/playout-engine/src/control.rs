//! Flags shared between the controller and the worker loops.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use playout_audio::VolumeControl;
use playout_ipc::Volume;

/// The only state the controller writes and the workers read.
///
/// Seeks are counted rather than flagged: the controller bumps
/// `seek_requested`, the decoder copies it into `seek_acknowledged` once
/// the flush is done. A second reset arriving mid-seek is never lost.
#[derive(Debug)]
pub struct PlaybackFlags {
    paused: AtomicBool,
    stop: AtomicBool,
    seek_requested: AtomicU64,
    seek_acknowledged: AtomicU64,
    seek_target_us: AtomicU64,
    volume: VolumeControl,
    gate: Mutex<()>,
    wake: Condvar,
}

impl PlaybackFlags {
    pub fn new(volume: Volume) -> Self {
        Self {
            paused: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            seek_requested: AtomicU64::new(0),
            seek_acknowledged: AtomicU64::new(0),
            seek_target_us: AtomicU64::new(0),
            volume: VolumeControl::new(volume),
            gate: Mutex::new(()),
            wake: Condvar::new(),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn set_paused(&self, paused: bool) {
        self.update(|| self.paused.store(paused, Ordering::SeqCst));
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn request_stop(&self) {
        self.update(|| self.stop.store(true, Ordering::SeqCst));
    }

    /// Ask the decoder to seek. Returns the request's generation.
    pub fn request_seek(&self, position: Duration) -> u64 {
        let micros = u64::try_from(position.as_micros()).unwrap_or(u64::MAX);
        let mut generation = 0;
        self.update(|| {
            self.seek_target_us.store(micros, Ordering::SeqCst);
            generation = self.seek_requested.fetch_add(1, Ordering::SeqCst) + 1;
        });
        generation
    }

    /// The newest seek not yet acknowledged, as `(generation, target)`.
    pub fn pending_seek(&self) -> Option<(u64, Duration)> {
        let requested = self.seek_requested.load(Ordering::SeqCst);
        if requested == self.seek_acknowledged.load(Ordering::SeqCst) {
            return None;
        }
        let target = Duration::from_micros(self.seek_target_us.load(Ordering::SeqCst));
        Some((requested, target))
    }

    /// Mark every seek up to `generation` as done.
    pub fn acknowledge_seek(&self, generation: u64) {
        self.update(|| {
            self.seek_acknowledged
                .fetch_max(generation, Ordering::SeqCst);
        });
    }

    pub fn is_seek_pending(&self) -> bool {
        self.pending_seek().is_some()
    }

    pub fn volume(&self) -> &VolumeControl {
        &self.volume
    }

    /// Block until a flag changes or `timeout` elapses.
    ///
    /// Returns immediately if the stop flag is already set.
    pub fn wait_for_change(&self, timeout: Duration) {
        let mut gate = self.gate.lock();
        if self.is_stopped() {
            return;
        }
        self.wake.wait_for(&mut gate, timeout);
    }

    /// Wake every thread blocked in [`wait_for_change`](Self::wait_for_change).
    pub fn notify(&self) {
        let _gate = self.gate.lock();
        self.wake.notify_all();
    }

    // Writes happen under the gate so a waiter cannot check a flag, miss
    // the write, and then sleep through the notification.
    fn update(&self, write: impl FnOnce()) {
        let _gate = self.gate.lock();
        write();
        self.wake.notify_all();
    }
}

impl Default for PlaybackFlags {
    fn default() -> Self {
        Self::new(Volume::MAX)
    }
}
