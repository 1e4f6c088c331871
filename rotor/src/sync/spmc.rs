//! Lock-free SPMC channel for inter-thread communication.
//!
//! One producer, any number of consumers racing to claim entries. The
//! producer side is byte-for-byte the same algorithm as [`super::spsc`];
//! "multi-consumer" only describes the dequeue side. Consumers claim via an
//! optimistic read followed by a compare-and-swap on the shared head; each
//! entry is delivered to exactly one claimant.
//!
//! # Example
//!
//! ```
//! use rotor::sync::spmc;
//!
//! let (producer, consumer) = spmc::channel::<usize>(1024);
//! let worker = consumer.clone();
//!
//! producer.push(7).expect("queue full");
//! assert_eq!(consumer.pop().or_else(|| worker.pop()), Some(7));
//! ```
//!
//! # Thread Safety
//!
//! [`Producer`] is `Send + !Sync + !Clone`: there must be exactly one.
//! [`Consumer`] is `Clone + Send + Sync`: hand clones to worker threads, or
//! share one behind a reference; any number of threads may claim
//! concurrently.

use std::marker::PhantomData;
use std::sync::Arc;

use minstant::Instant;

use super::{PhantomUnsync, Shared, Timeout};
use crate::word::Word;

/// Creates a bounded SPMC channel with `capacity` slots.
///
/// One slot is reserved to disambiguate full from empty, so at most
/// `capacity - 1` entries are ever held at once.
///
/// # Panics
///
/// Panics unless `capacity` is a power of two >= 2.
#[must_use]
pub fn channel<T: Word + Send>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    let shared = Arc::new(Shared::new(capacity));

    let producer = Producer {
        shared: Arc::clone(&shared),
        _unsync: PhantomData,
    };

    let consumer = Consumer { shared };

    (producer, consumer)
}

/// Write end of the SPMC channel.
///
/// Enqueueing is oblivious to how many consumers exist; this is the same
/// single-producer publish as the SPSC channel's.
pub struct Producer<T: Word> {
    shared: Arc<Shared<T>>,
    _unsync: PhantomUnsync,
}

impl<T: Word> Producer<T> {
    /// Attempts to push a payload (non-blocking).
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` if the queue is full.
    #[inline]
    pub fn push(&self, item: T) -> Result<(), T> {
        // SAFETY: this endpoint is !Sync and !Clone, so it is the only
        // producer; the slot array is the ring's own storage.
        unsafe { self.shared.ring.push(&self.shared.slots, item.into_word()) }
            // SAFETY: the rejected word is the one we just converted.
            .map_err(|word| unsafe { T::from_word(word) })
    }

    /// Pushes a payload and reports how many entries were occupied
    /// immediately before it was published. See
    /// [`spsc::Producer::push_with_len`](super::spsc::Producer::push_with_len).
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` if the queue is full.
    #[inline]
    pub fn push_with_len(&self, item: T) -> Result<usize, T> {
        // SAFETY: as in push.
        unsafe {
            self.shared
                .ring
                .push_with_len(&self.shared.slots, item.into_word())
        }
        // SAFETY: as in push.
        .map_err(|word| unsafe { T::from_word(word) })
    }

    /// Spins until space is available, then pushes.
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` on timeout.
    pub fn push_blocking(&self, mut item: T, timeout: Timeout) -> Result<(), T> {
        let deadline = match timeout {
            Timeout::Infinite => None,
            Timeout::Duration(d) => Some(Instant::now() + d),
        };
        loop {
            match self.push(item) {
                Ok(()) => return Ok(()),
                Err(returned) => {
                    item = returned;
                    if let Some(dl) = deadline
                        && Instant::now() > dl
                    {
                        return Err(item);
                    }
                    std::hint::spin_loop();
                }
            }
        }
    }

    /// Advisory snapshot of the occupied entry count.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.ring.len()
    }

    /// Returns true if the occupancy snapshot is zero.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.ring.is_empty()
    }

    /// Total slot count (usable capacity is one less).
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.ring.capacity()
    }
}

/// Read end of the SPMC channel.
///
/// Cloneable and shareable; every handle claims from the same queue.
pub struct Consumer<T: Word> {
    shared: Arc<Shared<T>>,
}

impl<T: Word> Clone for Consumer<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Word> Consumer<T> {
    /// Claims the next entry, retrying lost races (non-blocking).
    ///
    /// Returns `None` only when the queue is observed empty. Lock-free: a
    /// retry happens only because another consumer's claim succeeded.
    #[inline]
    #[must_use]
    pub fn pop(&self) -> Option<T> {
        // SAFETY: multi-consumer dequeues may race freely; no pop_sc caller
        // exists on this channel flavor.
        unsafe { self.shared.ring.pop_mc(&self.shared.slots) }
            // SAFETY: the winning claim delivers each word exactly once.
            .map(|word| unsafe { T::from_word(word) })
    }

    /// Makes a single claim attempt (non-blocking).
    ///
    /// Returns `None` if the queue is empty **or** if another consumer won
    /// the race for the current entry; the two are indistinguishable here.
    /// Use [`pop`](Self::pop) to retry lost races automatically.
    #[inline]
    #[must_use]
    pub fn try_pop(&self) -> Option<T> {
        // SAFETY: as in pop.
        unsafe { self.shared.ring.try_pop_mc(&self.shared.slots) }
            // SAFETY: as in pop.
            .map(|word| unsafe { T::from_word(word) })
    }

    /// Spins until an entry is claimed, then returns it.
    ///
    /// Returns `None` on timeout.
    #[must_use]
    pub fn pop_blocking(&self, timeout: Timeout) -> Option<T> {
        let deadline = match timeout {
            Timeout::Infinite => None,
            Timeout::Duration(d) => Some(Instant::now() + d),
        };
        loop {
            if let Some(item) = self.pop() {
                return Some(item);
            }
            if let Some(dl) = deadline
                && Instant::now() > dl
            {
                return None;
            }
            std::hint::spin_loop();
        }
    }

    /// Advisory snapshot of the occupied entry count.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.ring.len()
    }

    /// Returns true if the occupancy snapshot is zero.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.ring.is_empty()
    }

    /// Total slot count (usable capacity is one less).
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.ring.capacity()
    }
}
