//! Fixed-capacity ring buffer for bounded telemetry history.
//!
//! When the buffer is full, pushing a new item silently evicts the oldest
//! one from the front. Memory usage is bounded at `capacity` items no
//! matter how long a session runs.
//!
//! # Usage
//!
//! The stats sampler keeps one `RingBuffer` per metric series and pushes
//! into all of them on every tick, so equal capacities keep the series
//! index-aligned. The inspection log keeps its recent message records in
//! one as well.

// Rust guideline compliant 2026-02

use std::collections::VecDeque;

/// Fixed-capacity FIFO with oldest-first eviction.
#[derive(Debug, Clone, PartialEq)]
pub struct RingBuffer<T> {
    buf: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Create a new ring buffer holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "RingBuffer capacity must be > 0");
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `item`, returning the evicted oldest item if the buffer was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.buf.len() == self.capacity {
            self.buf.pop_front()
        } else {
            None
        };
        self.buf.push_back(item);
        evicted
    }

    /// Iterate oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.buf.iter()
    }

    /// Most recently pushed item.
    #[must_use]
    pub fn latest(&self) -> Option<&T> {
        self.buf.back()
    }

    /// Item at `index`, counting from the oldest.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.buf.get(index)
    }

    /// Current number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Discard all items without changing capacity.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Configured maximum number of items.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Copy of all items, oldest first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.buf.iter().cloned().collect()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
