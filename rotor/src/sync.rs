//! In-process channels over the core ring.
//!
//! This module provides typed, heap-backed queues for communication between
//! threads within the same process:
//!
//! - [`spsc`] - one producer, one consumer
//! - [`spmc`] - one producer, any number of concurrently claiming consumers
//!
//! Both are thin typed wrappers around the same [`crate::ring`] control
//! block; they differ only in which dequeue variant they call and in how
//! the consumer handle may be shared.

use std::cell::Cell;
use std::marker::PhantomData;
use std::time::Duration;

use crate::ring::{Ring, Slot};
use crate::word::Word;

pub mod spmc;
pub mod spsc;

/// Timeout specification for the blocking convenience wrappers.
///
/// The ring itself never waits; these wrappers spin over the non-blocking
/// operations with an optional deadline.
#[derive(Debug, Clone, Copy)]
pub enum Timeout {
    /// Wait indefinitely.
    Infinite,
    /// Wait for at most the specified duration.
    Duration(Duration),
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Self::Duration(d)
    }
}

/// Marker type to opt-out of `Sync` while remaining `Send`.
pub(crate) type PhantomUnsync = PhantomData<Cell<&'static ()>>;

/// Heap-backed ring state shared by the endpoints of a channel.
///
/// Holds the control block together with the slot storage it indexes. The
/// payload type only exists at this layer; the ring below moves opaque
/// words.
pub(crate) struct Shared<T: Word> {
    pub(crate) ring: Ring,
    pub(crate) slots: Box<[Slot]>,
    _payload: PhantomData<T>,
}

impl<T: Word> Shared<T> {
    /// Allocates ring state for `capacity` slots (`capacity - 1` usable).
    ///
    /// # Panics
    ///
    /// Panics unless `capacity` is a power of two >= 2. The core treats the
    /// power-of-two requirement as an unchecked contract; this constructor
    /// is the enforcement seam for in-process channels.
    pub(crate) fn new(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two() && capacity >= 2,
            "channel capacity must be a power of two >= 2, got {capacity}"
        );
        Self {
            ring: Ring::new(capacity),
            slots: (0..capacity).map(|_| Slot::new()).collect(),
            _payload: PhantomData,
        }
    }
}

impl<T: Word> Drop for Shared<T> {
    fn drop(&mut self) {
        // Both endpoints are gone, so this thread has exclusive access.
        // Undelivered entries still carry custody of their payloads; pull
        // them back out so owning types (Box) are released.
        while let Some(word) = unsafe { self.ring.pop_sc(&self.slots) } {
            // SAFETY: the word was produced by into_word on push and has
            // not been delivered to any consumer.
            drop(unsafe { T::from_word(word) });
        }
    }
}

// SAFETY: Shared is a channel body: payload values are moved through it,
// never shared, so transferring or sharing the *structure* across threads
// only requires the payload type to be Send. The ring and slots are atomics
// with their own synchronization protocol.
unsafe impl<T: Word + Send> Send for Shared<T> {}
unsafe impl<T: Word + Send> Sync for Shared<T> {}
