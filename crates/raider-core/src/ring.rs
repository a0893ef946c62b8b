//! Bounded ring buffer shared between the wait-state path and the service loop.
//!
//! Storage is allocated once. When the buffer is full the newest record is
//! rejected and counted; an unread record is never overwritten.

use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Observer, Producer};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RingError {
    #[error("ring buffer full")]
    Full,
}

/// Fixed-capacity single-producer single-consumer ring.
pub struct SpscRing<T> {
    rb: HeapRb<T>,
    lost: u64,
}

impl<T> SpscRing<T> {
    /// Create a ring holding up to `capacity` records (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            rb: HeapRb::new(capacity.max(1)),
            lost: 0,
        }
    }

    /// Append a record, or drop it and bump the loss counter if full.
    pub fn try_put(&mut self, item: T) -> Result<(), RingError> {
        if self.rb.try_push(item).is_err() {
            self.lost += 1;
            return Err(RingError::Full);
        }
        Ok(())
    }

    /// Take the oldest record.
    pub fn try_get(&mut self) -> Option<T> {
        self.rb.try_pop()
    }

    /// Look at the oldest record without taking it.
    #[must_use]
    pub fn peek(&self) -> Option<&T> {
        self.rb.iter().next()
    }

    #[must_use]
    pub fn occupancy(&self) -> usize {
        self.rb.occupied_len()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.rb.capacity().get()
    }

    /// Free slots left.
    #[must_use]
    pub fn headroom(&self) -> usize {
        self.rb.vacant_len()
    }

    /// Records rejected because the ring was full.
    #[must_use]
    pub const fn lost(&self) -> u64 {
        self.lost
    }

    /// Drop every unread record. The loss counter is kept.
    pub fn clear(&mut self) {
        while self.rb.try_pop().is_some() {}
    }

    pub fn reset_lost(&mut self) {
        self.lost = 0;
    }
}
