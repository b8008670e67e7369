//! Bounded lock-free queue that never blocks the producer
//!
//! On overflow the oldest entry is evicted and counted.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct DropOldestQueue<T> {
    queue: ArrayQueue<T>,
    dropped: AtomicU64,
}

impl<T> DropOldestQueue<T> {
    /// `capacity` must be non-zero
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            dropped: AtomicU64::new(0),
        }
    }

    /// Push, evicting the oldest entry when full. Returns the evicted entry.
    pub fn push(&self, item: T) -> Option<T> {
        let evicted = self.queue.force_push(item);
        if evicted.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        evicted
    }

    pub fn pop(&self) -> Option<T> {
        self.queue.pop()
    }

    /// Entries evicted since creation
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}
