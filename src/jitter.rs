//! Bounded FIFO used as a jitter buffer between capture, transport, and
//! playback. Under sustained overload it drops the newest item instead of
//! blocking the producer or growing without bound.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

/// How long [`JitterBuffer::pop`] waits by default before reporting empty,
/// letting consumers re-check shutdown and state conditions.
pub const POP_WAIT: Duration = Duration::from_millis(100);

pub struct JitterBuffer<T> {
    items: Mutex<VecDeque<T>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl<T> JitterBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "jitter buffer capacity must be non-zero");
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Insert an item, dropping it (not the queue head) when full.
    /// Returns false when the item was dropped. Never blocks.
    pub fn push(&self, item: T) -> bool {
        let mut items = self.items.lock().expect("jitter buffer poisoned");
        if items.len() >= self.capacity {
            drop(items);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        items.push_back(item);
        drop(items);
        self.notify.notify_one();
        true
    }

    /// Wait up to `wait` for an item. Returns None on timeout so callers
    /// can re-check their loop conditions; this is the only blocking
    /// operation and it is always bounded.
    pub async fn pop(&self, wait: Duration) -> Option<T> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            if timeout_at(deadline, self.notify.notified()).await.is_err() {
                return self.try_pop();
            }
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        self.items
            .lock()
            .expect("jitter buffer poisoned")
            .pop_front()
    }

    /// Discard everything currently queued, returning how many items were
    /// thrown away.
    pub fn clear(&self) -> usize {
        let mut items = self.items.lock().expect("jitter buffer poisoned");
        let cleared = items.len();
        items.clear();
        cleared
    }

    pub fn len(&self) -> usize {
        self.items.lock().expect("jitter buffer poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total items dropped at the push side since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn overfill_keeps_the_oldest_items_in_order() {
        let buffer = JitterBuffer::new(8);
        for i in 0..13 {
            buffer.push(i);
        }
        assert_eq!(buffer.len(), 8);
        assert_eq!(buffer.dropped(), 5);

        let mut drained = Vec::new();
        while let Some(item) = buffer.try_pop() {
            drained.push(item);
        }
        assert_eq!(drained, (0..8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn pop_times_out_on_empty() {
        let buffer: JitterBuffer<u8> = JitterBuffer::new(4);
        let started = std::time::Instant::now();
        assert_eq!(buffer.pop(Duration::from_millis(20)).await, None);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn pop_wakes_on_push() {
        let buffer = std::sync::Arc::new(JitterBuffer::new(4));
        let popper = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.pop(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        buffer.push(42u32);
        assert_eq!(popper.await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn clear_empties_the_queue() {
        let buffer = JitterBuffer::new(4);
        buffer.push(1);
        buffer.push(2);
        assert_eq!(buffer.clear(), 2);
        assert!(buffer.is_empty());
        // Clearing does not count as dropping.
        assert_eq!(buffer.dropped(), 0);
    }
}
