//! Bounded frame queue shared by the decoder and the consumers.
//!
//! The queue decouples decode rate from presentation rate. Video uses
//! [`OverflowPolicy::Block`] so the decoder waits for the presenter. Audio
//! uses [`OverflowPolicy::DropOldest`] so the device callback always finds
//! the newest samples.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::frame::Frame;

/// What `push` does when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Wait until a consumer makes room.
    Block,

    /// Evict and drop the longest-resident frame.
    DropOldest,
}

/// Result of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The frame was enqueued.
    Pushed,

    /// The frame was enqueued after evicting the oldest one.
    Replaced,

    /// The queue is stopped. The frame was dropped.
    Stopped,

    /// The queue was full and `interrupt` had been called. The frame was dropped.
    Interrupted,
}

impl PushOutcome {
    /// Returns true if the frame ended up in the queue.
    pub fn is_enqueued(self) -> bool {
        matches!(self, Self::Pushed | Self::Replaced)
    }
}

struct Inner {
    frames: VecDeque<Frame>,
    stopped: bool,
    // Set by `interrupt`, cleared by `flush`.
    interrupted: bool,
}

/// A capacity-limited FIFO of [`Frame`]s.
pub struct BoundedFrameQueue {
    name: &'static str,
    capacity: usize,
    policy: OverflowPolicy,
    inner: Mutex<Inner>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl BoundedFrameQueue {
    /// Create a queue. A zero capacity is raised to one.
    pub fn new(name: &'static str, capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            name,
            capacity,
            policy,
            inner: Mutex::new(Inner {
                frames: VecDeque::with_capacity(capacity),
                stopped: false,
                interrupted: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Push a frame, applying the overflow policy when full.
    pub fn push(&self, frame: Frame) -> PushOutcome {
        let mut inner = self.inner.lock();
        if inner.stopped {
            return PushOutcome::Stopped;
        }

        let mut evicted = None;
        match self.policy {
            OverflowPolicy::Block => {
                while inner.frames.len() >= self.capacity {
                    if inner.interrupted {
                        return PushOutcome::Interrupted;
                    }
                    self.not_full.wait(&mut inner);
                    if inner.stopped {
                        return PushOutcome::Stopped;
                    }
                }
            }
            OverflowPolicy::DropOldest => {
                if inner.frames.len() >= self.capacity {
                    evicted = inner.frames.pop_front();
                }
            }
        }

        inner.frames.push_back(frame);
        drop(inner);
        self.not_empty.notify_one();

        match evicted {
            Some(old) => {
                trace!(queue = self.name, sequence = old.sequence(), "Evicted oldest frame");
                PushOutcome::Replaced
            }
            None => PushOutcome::Pushed,
        }
    }

    /// Take the next frame, blocking while empty.
    ///
    /// Returns `None` only once the queue is stopped and drained.
    pub fn pop(&self) -> Option<Frame> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(frame) = inner.frames.pop_front() {
                drop(inner);
                self.not_full.notify_one();
                return Some(frame);
            }
            if inner.stopped {
                return None;
            }
            self.not_empty.wait(&mut inner);
        }
    }

    /// Take the next frame, waiting at most `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Frame> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(frame) = inner.frames.pop_front() {
                drop(inner);
                self.not_full.notify_one();
                return Some(frame);
            }
            if inner.stopped {
                return None;
            }
            if self.not_empty.wait_until(&mut inner, deadline).timed_out() {
                let frame = inner.frames.pop_front();
                drop(inner);
                if frame.is_some() {
                    self.not_full.notify_one();
                }
                return frame;
            }
        }
    }

    /// Take the next frame without blocking.
    pub fn try_pop(&self) -> Option<Frame> {
        let frame = self.inner.lock().frames.pop_front();
        if frame.is_some() {
            self.not_full.notify_one();
        }
        frame
    }

    /// Drop every queued frame, clear any interrupt and wake blocked pushers.
    /// Returns how many frames were dropped.
    pub fn flush(&self) -> usize {
        let drained = {
            let mut inner = self.inner.lock();
            inner.interrupted = false;
            std::mem::take(&mut inner.frames)
        };
        self.not_full.notify_all();
        let count = drained.len();
        drop(drained);
        if count > 0 {
            trace!(queue = self.name, count, "Flushed frames");
        }
        count
    }

    /// Stop the queue and wake every waiter. Pushes fail from now on.
    pub fn stop(&self) {
        self.inner.lock().stopped = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Make blocking pushes return `Interrupted` instead of waiting for room,
    /// until the next [`flush`](Self::flush).
    ///
    /// A push that is already waiting is woken. A push that starts later and
    /// finds the queue full returns at once, so the interrupt cannot be missed.
    pub fn interrupt(&self) {
        self.inner.lock().interrupted = true;
        self.not_full.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.lock().stopped
    }

    /// Current depth. Advisory only.
    pub fn len(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl std::fmt::Debug for BoundedFrameQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedFrameQueue")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    use crate::frame::{AudioBuffer, FrameLedger, FramePayload};
    use crate::time::{Rational, Timestamp};

    fn frame(seq: u64, ledger: &Arc<FrameLedger>) -> Frame {
        Frame::tracked(
            Timestamp::new(seq as i64, Rational::new(1, 25)),
            seq,
            FramePayload::Audio(AudioBuffer {
                samples: vec![0.0; 4],
                sample_rate: 48_000,
                channels: 2,
            }),
            ledger,
        )
    }

    #[test]
    fn test_fifo_order() {
        let ledger = FrameLedger::new();
        let queue = BoundedFrameQueue::new("test", 4, OverflowPolicy::Block);
        for seq in 0..3 {
            assert_eq!(queue.push(frame(seq, &ledger)), PushOutcome::Pushed);
        }
        let order: Vec<u64> = std::iter::from_fn(|| queue.try_pop()).map(|f| f.sequence()).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(ledger.live(), 0);
    }

    #[test]
    fn test_drop_oldest_evicts_front() {
        let ledger = FrameLedger::new();
        let queue = BoundedFrameQueue::new("audio", 2, OverflowPolicy::DropOldest);
        assert_eq!(queue.push(frame(0, &ledger)), PushOutcome::Pushed);
        assert_eq!(queue.push(frame(1, &ledger)), PushOutcome::Pushed);
        assert_eq!(queue.push(frame(2, &ledger)), PushOutcome::Replaced);

        assert_eq!(queue.len(), 2);
        assert_eq!(ledger.live(), 2);
        assert_eq!(queue.try_pop().map(|f| f.sequence()), Some(1));
        assert_eq!(queue.try_pop().map(|f| f.sequence()), Some(2));
    }

    #[test]
    fn test_blocking_push_waits_for_consumer() {
        let ledger = FrameLedger::new();
        let queue = Arc::new(BoundedFrameQueue::new("video", 1, OverflowPolicy::Block));
        queue.push(frame(0, &ledger));

        let producer = {
            let queue = Arc::clone(&queue);
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || queue.push(frame(1, &ledger)))
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().map(|f| f.sequence()), Some(0));

        assert_eq!(producer.join().unwrap(), PushOutcome::Pushed);
        assert_eq!(queue.pop().map(|f| f.sequence()), Some(1));
        assert!(queue.len() <= queue.capacity());
    }

    #[test]
    fn test_stop_wakes_blocked_producer() {
        let ledger = FrameLedger::new();
        let queue = Arc::new(BoundedFrameQueue::new("video", 1, OverflowPolicy::Block));
        queue.push(frame(0, &ledger));

        let producer = {
            let queue = Arc::clone(&queue);
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || queue.push(frame(1, &ledger)))
        };

        thread::sleep(Duration::from_millis(20));
        queue.stop();
        assert_eq!(producer.join().unwrap(), PushOutcome::Stopped);
        assert_eq!(queue.flush(), 1);
        assert_eq!(ledger.live(), 0);
    }

    #[test]
    fn test_stop_wakes_blocked_consumer() {
        let queue = Arc::new(BoundedFrameQueue::new("video", 2, OverflowPolicy::Block));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };

        thread::sleep(Duration::from_millis(20));
        queue.stop();
        assert!(consumer.join().unwrap().is_none());
        assert!(queue.is_stopped());
    }

    #[test]
    fn test_interrupt_releases_pusher_without_stopping() {
        let ledger = FrameLedger::new();
        let queue = Arc::new(BoundedFrameQueue::new("video", 1, OverflowPolicy::Block));
        queue.push(frame(0, &ledger));

        let producer = {
            let queue = Arc::clone(&queue);
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || queue.push(frame(1, &ledger)))
        };

        thread::sleep(Duration::from_millis(20));
        queue.interrupt();
        assert_eq!(producer.join().unwrap(), PushOutcome::Interrupted);
        assert!(!queue.is_stopped());

        queue.flush();
        assert_eq!(queue.push(frame(2, &ledger)), PushOutcome::Pushed);
        assert_eq!(ledger.live(), 1);
    }

    #[test]
    fn test_interrupt_is_sticky_until_flush() {
        let ledger = FrameLedger::new();
        let queue = BoundedFrameQueue::new("video", 1, OverflowPolicy::Block);
        queue.interrupt();

        assert_eq!(queue.push(frame(0, &ledger)), PushOutcome::Pushed);
        assert_eq!(queue.push(frame(1, &ledger)), PushOutcome::Interrupted);
        assert_eq!(ledger.live(), 1);

        assert_eq!(queue.flush(), 1);
        assert_eq!(queue.push(frame(2, &ledger)), PushOutcome::Pushed);
        assert_eq!(ledger.live(), 1);
    }

    #[test]
    fn test_flush_releases_everything() {
        let ledger = FrameLedger::new();
        let queue = BoundedFrameQueue::new("audio", 8, OverflowPolicy::DropOldest);
        for seq in 0..5 {
            queue.push(frame(seq, &ledger));
        }
        assert_eq!(queue.flush(), 5);
        assert!(queue.is_empty());
        assert_eq!(ledger.live(), 0);
    }

    #[test]
    fn test_push_after_stop_drops_frame() {
        let ledger = FrameLedger::new();
        let queue = BoundedFrameQueue::new("audio", 8, OverflowPolicy::DropOldest);
        queue.stop();
        assert_eq!(queue.push(frame(0, &ledger)), PushOutcome::Stopped);
        assert_eq!(ledger.live(), 0);
    }

    #[test]
    fn test_pop_timeout_expires() {
        let queue = BoundedFrameQueue::new("video", 2, OverflowPolicy::Block);
        let start = Instant::now();
        assert!(queue.pop_timeout(Duration::from_millis(30)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_capacity_never_exceeded_under_contention() {
        let ledger = FrameLedger::new();
        let queue = Arc::new(BoundedFrameQueue::new("video", 3, OverflowPolicy::Block));

        let producer = {
            let queue = Arc::clone(&queue);
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                for seq in 0..200 {
                    queue.push(frame(seq, &ledger));
                }
            })
        };

        let mut last = None;
        for _ in 0..200 {
            assert!(queue.len() <= 3);
            let f = queue.pop().unwrap();
            if let Some(prev) = last {
                assert!(f.sequence() > prev);
            }
            last = Some(f.sequence());
        }
        producer.join().unwrap();
        assert_eq!(ledger.live(), 0);
    }
}
