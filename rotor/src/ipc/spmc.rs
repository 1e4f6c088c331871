//! Lock-free SPMC queue over POSIX shared memory.
//!
//! One producer process feeds any number of consumer processes; consumers
//! claim entries via compare-and-swap on the shared head, and each word is
//! delivered to exactly one claimant. The producer side is the same
//! algorithm as [`super::spsc`]; only the dequeue side differs.
//!
//! # Example
//!
//! ```no_run
//! use rotor::ipc::spmc::{Consumer, Producer};
//!
//! // Producer process
//! let producer = Producer::<1024, _>::create("/work-queue")?;
//! producer.push(7).expect("queue full");
//!
//! // Each worker process
//! let consumer = Consumer::<1024, _>::open("/work-queue")?;
//! if let Some(entry) = consumer.pop() {
//!     // exactly one worker gets `entry`
//! }
//! # Ok::<(), rotor::ipc::shmem::ShmError>(())
//! ```
//!
//! # Thread Safety
//!
//! [`Producer`] is `Send + !Sync + !Clone` (one pushing thread per the
//! single-producer contract). [`Consumer`] is `Sync`: within a process any
//! number of threads may claim through a shared reference, and across
//! processes every worker opens its own endpoint.

use std::marker::PhantomData;
use std::time::Duration;

use super::PhantomUnsync;
use super::segment::Segment;
use super::shmem::{Creator, Opener, Shm, ShmError, ShmMode};

const INIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Write end of the shared-memory SPMC queue.
pub struct Producer<const N: usize, Mode: ShmMode> {
    shm: Shm<Segment<N>, Mode>,
    _unsync: PhantomUnsync,
}

impl<const N: usize> Producer<N, Creator> {
    /// Creates the queue and returns the producer end. Unlinks the name on
    /// drop. Fails to compile unless `N` is a power of two >= 2.
    ///
    /// # Errors
    ///
    /// `EEXIST` (name exists), `EACCES` (permissions), `ENOMEM`.
    pub fn create(path: &str) -> Result<Self, ShmError> {
        let () = Segment::<N>::CAPACITY_OK;
        let shm = Shm::<Segment<N>, Creator>::create(path, Segment::<N>::init_in_place)?;
        Ok(Self {
            shm,
            _unsync: PhantomData,
        })
    }
}

impl<const N: usize> Producer<N, Opener> {
    /// Opens an existing queue and returns the producer end. Waits up to 1s
    /// for the creator to finish initialization.
    ///
    /// # Errors
    ///
    /// `ENOENT` (no such queue), `EACCES`, size mismatch, init timeout.
    pub fn open(path: &str) -> Result<Self, ShmError> {
        let () = Segment::<N>::CAPACITY_OK;
        let shm = Shm::<Segment<N>, Opener>::open(path)?;
        if !shm.wait_ready(INIT_TIMEOUT) {
            return Err(ShmError::InitTimeout {
                path: path.to_string(),
                timeout: INIT_TIMEOUT,
            });
        }
        Ok(Self {
            shm,
            _unsync: PhantomData,
        })
    }
}

impl<const N: usize, Mode: ShmMode> Producer<N, Mode> {
    /// Attempts to push a word (non-blocking).
    ///
    /// # Errors
    ///
    /// Returns `Err(entry)` if the queue is full.
    #[inline]
    pub fn push(&self, entry: usize) -> Result<(), usize> {
        // SAFETY: this endpoint is !Sync and !Clone, so it is the only
        // producer in this process; single-producer across processes is the
        // documented caller contract.
        unsafe { self.shm.ring.push(&self.shm.slots, entry) }
    }

    /// Pushes a word and reports the occupied count immediately before it
    /// was published.
    ///
    /// # Errors
    ///
    /// Returns `Err(entry)` if the queue is full.
    #[inline]
    pub fn push_with_len(&self, entry: usize) -> Result<usize, usize> {
        // SAFETY: as in push.
        unsafe { self.shm.ring.push_with_len(&self.shm.slots, entry) }
    }

    /// Advisory snapshot of the occupied entry count.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.shm.ring.len()
    }

    /// Returns true if the occupancy snapshot is zero.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shm.ring.is_empty()
    }

    /// Total slot count (usable capacity is one less).
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shm.ring.capacity()
    }
}

/// Read end of the shared-memory SPMC queue.
///
/// `Sync`: threads may share one endpoint; processes each open their own.
pub struct Consumer<const N: usize, Mode: ShmMode> {
    shm: Shm<Segment<N>, Mode>,
}

impl<const N: usize> Consumer<N, Creator> {
    /// Creates the queue and returns a consumer end.
    ///
    /// # Errors
    ///
    /// See [`Producer::create`].
    pub fn create(path: &str) -> Result<Self, ShmError> {
        let () = Segment::<N>::CAPACITY_OK;
        let shm = Shm::<Segment<N>, Creator>::create(path, Segment::<N>::init_in_place)?;
        Ok(Self { shm })
    }
}

impl<const N: usize> Consumer<N, Opener> {
    /// Opens an existing queue and returns a consumer end.
    ///
    /// # Errors
    ///
    /// See [`Producer::open`].
    pub fn open(path: &str) -> Result<Self, ShmError> {
        let () = Segment::<N>::CAPACITY_OK;
        let shm = Shm::<Segment<N>, Opener>::open(path)?;
        if !shm.wait_ready(INIT_TIMEOUT) {
            return Err(ShmError::InitTimeout {
                path: path.to_string(),
                timeout: INIT_TIMEOUT,
            });
        }
        Ok(Self { shm })
    }
}

impl<const N: usize, Mode: ShmMode> Consumer<N, Mode> {
    /// Claims the next word, retrying lost races (non-blocking).
    ///
    /// Returns `None` only when the queue is observed empty.
    #[inline]
    #[must_use]
    pub fn pop(&self) -> Option<usize> {
        // SAFETY: multi-consumer dequeues may race freely across threads
        // and processes; no exclusive-consumer caller exists on this queue
        // flavor.
        unsafe { self.shm.ring.pop_mc(&self.shm.slots) }
    }

    /// Makes a single claim attempt (non-blocking).
    ///
    /// Returns `None` if the queue is empty **or** the race for the current
    /// entry was lost; the caller decides whether to retry.
    #[inline]
    #[must_use]
    pub fn try_pop(&self) -> Option<usize> {
        // SAFETY: as in pop.
        unsafe { self.shm.ring.try_pop_mc(&self.shm.slots) }
    }

    /// Advisory snapshot of the occupied entry count.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.shm.ring.len()
    }

    /// Returns true if the occupancy snapshot is zero.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shm.ring.is_empty()
    }

    /// Total slot count (usable capacity is one less).
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shm.ring.capacity()
    }
}
