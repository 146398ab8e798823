//! Volume control and sample mixing.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use playout_ipc::Volume;

/// Shared output volume.
///
/// Written by the controller, read by the audio callback without locking.
#[derive(Debug, Clone)]
pub struct VolumeControl {
    percent: Arc<AtomicU8>,
}

impl VolumeControl {
    /// Create a control at `initial`.
    pub fn new(initial: Volume) -> Self {
        Self {
            percent: Arc::new(AtomicU8::new(initial.percent())),
        }
    }

    /// Set the volume.
    pub fn set(&self, volume: Volume) {
        self.percent.store(volume.percent(), Ordering::Relaxed);
    }

    /// Get the current volume.
    pub fn get(&self) -> Volume {
        Volume::clamped(i64::from(self.percent.load(Ordering::Relaxed)))
    }

    /// Current linear gain.
    pub fn gain(&self) -> f32 {
        self.get().gain()
    }
}

impl Default for VolumeControl {
    fn default() -> Self {
        Self::new(Volume::MAX)
    }
}

/// Add `src` into `dst` at `gain`, soft clipping the result.
///
/// Only `min(dst.len(), src.len())` samples are touched.
pub fn mix_into(dst: &mut [f32], src: &[f32], gain: f32) {
    for (out, &sample) in dst.iter_mut().zip(src) {
        *out = soft_clip(*out + sample * gain);
    }
}

/// Soft clipping function to prevent harsh digital clipping.
pub fn soft_clip(sample: f32) -> f32 {
    if sample > 1.0 {
        1.0 - (-sample + 1.0).exp() * 0.5
    } else if sample < -1.0 {
        -1.0 + (sample + 1.0).exp() * 0.5
    } else {
        sample
    }
}
