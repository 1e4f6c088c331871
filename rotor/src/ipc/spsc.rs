//! Lock-free SPSC queue over POSIX shared memory.
//!
//! One producer process, one consumer process, raw `usize` words as
//! payloads. Either endpoint may be the [`Creator`] (owns and unlinks the
//! name) or the [`Opener`]; a daemon typically creates its inbox as a
//! consumer and clients open the producer end.
//!
//! # Example
//!
//! ```no_run
//! use rotor::ipc::spsc::{Consumer, Producer};
//!
//! // Process A
//! let producer = Producer::<1024, _>::create("/my-queue")?;
//! producer.push(42).expect("queue full");
//!
//! // Process B
//! let consumer = Consumer::<1024, _>::open("/my-queue")?;
//! assert_eq!(consumer.pop(), Some(42));
//! # Ok::<(), rotor::ipc::shmem::ShmError>(())
//! ```
//!
//! # Thread Safety
//!
//! Endpoints are [`Send`] but **not** [`Sync`] and not `Clone`, enforcing
//! one pushing thread and one popping thread *within* a process. Across
//! processes the type system has no reach: nothing stops two processes
//! from both opening a producer end, and that remains a caller contract.

use std::marker::PhantomData;
use std::time::Duration;

use super::PhantomUnsync;
use super::segment::Segment;
use super::shmem::{Creator, Opener, Shm, ShmError, ShmMode};

const INIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Write end of the shared-memory SPSC queue.
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
        // documented caller contract. The segment was initialized before
        // create/open returned.
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

/// Read end of the shared-memory SPSC queue.
pub struct Consumer<const N: usize, Mode: ShmMode> {
    shm: Shm<Segment<N>, Mode>,
    _unsync: PhantomUnsync,
}

impl<const N: usize> Consumer<N, Creator> {
    /// Creates the queue and returns the consumer end: the inbox pattern
    /// for daemons that receive from a client-owned producer.
    ///
    /// # Errors
    ///
    /// See [`Producer::create`].
    pub fn create(path: &str) -> Result<Self, ShmError> {
        let () = Segment::<N>::CAPACITY_OK;
        let shm = Shm::<Segment<N>, Creator>::create(path, Segment::<N>::init_in_place)?;
        Ok(Self {
            shm,
            _unsync: PhantomData,
        })
    }
}

impl<const N: usize> Consumer<N, Opener> {
    /// Opens an existing queue and returns the consumer end.
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
        Ok(Self {
            shm,
            _unsync: PhantomData,
        })
    }
}

impl<const N: usize, Mode: ShmMode> Consumer<N, Mode> {
    /// Attempts to pop a word (non-blocking).
    ///
    /// Returns `None` if the queue is empty.
    #[inline]
    #[must_use]
    pub fn pop(&self) -> Option<usize> {
        // SAFETY: this endpoint is !Sync and !Clone, so it is the only
        // consumer in this process; single-consumer across processes is the
        // documented caller contract.
        unsafe { self.shm.ring.pop_sc(&self.shm.slots) }
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
