//! Process-level shutdown request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Set by a signal handler, polled by the host loop.
///
/// Triggering it is equivalent to a `stop` command.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let signal = ShutdownSignal::new();
        let handler = signal.clone();
        assert!(!signal.is_triggered());

        handler.trigger();
        assert!(signal.is_triggered());
    }
}
