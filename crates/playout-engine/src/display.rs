//! Video output collaborators.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use playout_media::VideoBuffer;

use crate::error::PlayerError;
use crate::PlayerResult;

/// Where presented frames go.
pub trait VideoOutput: Send {
    /// Size frames should be scaled to before `present`.
    fn size(&self) -> (u32, u32);

    /// Show one frame.
    fn present(&mut self, frame: &VideoBuffer) -> PlayerResult<()>;

    /// Release the output. Called once during shutdown.
    fn close(&mut self) {}
}

/// A display that only counts what it is shown.
#[derive(Debug)]
pub struct HeadlessDisplay {
    width: u32,
    height: u32,
    presented: Arc<AtomicU64>,
}

impl HeadlessDisplay {
    pub fn new(width: u32, height: u32) -> Self {
        info!(width, height, "Using headless display");
        Self {
            width,
            height,
            presented: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared count of presented frames.
    pub fn presented_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.presented)
    }
}

impl VideoOutput for HeadlessDisplay {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn present(&mut self, frame: &VideoBuffer) -> PlayerResult<()> {
        if !frame.is_valid() {
            return Err(PlayerError::Display(format!(
                "frame {}x{} with {} bytes does not cover its rows",
                frame.width,
                frame.height,
                frame.data.len()
            )));
        }
        self.presented.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn close(&mut self) {
        debug!(
            presented = self.presented.load(Ordering::Relaxed),
            "Headless display closed"
        );
    }
}
