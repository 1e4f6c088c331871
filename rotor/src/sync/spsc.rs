//! Lock-free SPSC channel for inter-thread communication.
//!
//! A bounded queue over the core ring with exactly one producer and one
//! consumer. Every operation returns immediately; the `*_blocking` variants
//! are caller-side spin loops with a deadline.
//!
//! # Example
//!
//! ```
//! use rotor::sync::spsc;
//!
//! let (producer, consumer) = spsc::channel::<usize>(1024);
//!
//! producer.push(42).expect("queue full");
//! assert_eq!(consumer.pop(), Some(42));
//! ```
//!
//! # Thread Safety
//!
//! Both endpoints are [`Send`] but **not** [`Sync`] and not `Clone`: each
//! can move to another thread, but `&Producer`/`&Consumer` cannot be shared
//! between threads, so the single-producer/single-consumer contract of the
//! core ring is enforced by the type system rather than by documentation.

use std::marker::PhantomData;
use std::sync::Arc;

use minstant::Instant;

use super::{PhantomUnsync, Shared, Timeout};
use crate::word::Word;

/// Creates a bounded SPSC channel with `capacity` slots.
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

    let consumer = Consumer {
        shared,
        _unsync: PhantomData,
    };

    (producer, consumer)
}

/// Write end of the SPSC channel.
pub struct Producer<T: Word> {
    shared: Arc<Shared<T>>,
    _unsync: PhantomUnsync,
}

impl<T: Word> Producer<T> {
    /// Attempts to push a payload (non-blocking).
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` if the queue is full; the payload comes back to
    /// the caller untouched and the call may be retried.
    #[inline]
    pub fn push(&self, item: T) -> Result<(), T> {
        // SAFETY: this endpoint is !Sync and !Clone, so it is the only
        // producer; the slot array is the ring's own storage.
        unsafe { self.shared.ring.push(&self.shared.slots, item.into_word()) }
            // SAFETY: the rejected word is the one we just converted; custody
            // returns to the caller.
            .map_err(|word| unsafe { T::from_word(word) })
    }

    /// Pushes a payload and reports how many entries were occupied
    /// immediately before it was published.
    ///
    /// The snapshot comes from index values the producer already holds, so
    /// backlog visibility costs no extra cross-thread traffic.
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

/// Read end of the SPSC channel.
pub struct Consumer<T: Word> {
    shared: Arc<Shared<T>>,
    _unsync: PhantomUnsync,
}

impl<T: Word> Consumer<T> {
    /// Attempts to pop a payload (non-blocking).
    ///
    /// Returns `None` if the queue is empty.
    #[inline]
    #[must_use]
    pub fn pop(&self) -> Option<T> {
        // SAFETY: this endpoint is !Sync and !Clone, so it is the only
        // consumer; the slot array is the ring's own storage.
        unsafe { self.shared.ring.pop_sc(&self.shared.slots) }
            // SAFETY: the word was published by the producer's into_word and
            // is delivered exactly once by the exclusive-consumer protocol.
            .map(|word| unsafe { T::from_word(word) })
    }

    /// Spins until an entry is available, then pops.
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_basic_push_pop() {
        let (producer, consumer) = channel::<usize>(8);

        assert!(producer.push(42).is_ok());
        assert_eq!(consumer.pop(), Some(42));
        assert_eq!(consumer.pop(), None);
    }

    #[test]
    fn test_fifo_order() {
        let (producer, consumer) = channel::<usize>(16);

        for i in 0..10 {
            assert!(producer.push(i).is_ok());
        }
        for i in 0..10 {
            assert_eq!(consumer.pop(), Some(i));
        }
        assert_eq!(consumer.pop(), None);
    }

    #[test]
    fn test_queue_full_boundary() {
        // Capacity 4 holds at most 3 entries.
        let (producer, consumer) = channel::<usize>(4);

        for i in 0..3 {
            assert!(producer.push(i).is_ok(), "failed to push item {i}");
        }
        assert_eq!(producer.push(999), Err(999));
        assert_eq!(producer.len(), 3);

        assert_eq!(consumer.pop(), Some(0));
        assert!(producer.push(3).is_ok());
        assert_eq!(producer.push(1000), Err(1000));
    }

    #[test]
    fn test_push_with_len_matches_tracked_count() {
        let (producer, consumer) = channel::<usize>(16);

        let mut tracked = 0usize;
        for i in 0..10 {
            assert_eq!(producer.push_with_len(i).unwrap(), tracked);
            tracked += 1;
        }
        for _ in 0..4 {
            consumer.pop().unwrap();
            tracked -= 1;
        }
        assert_eq!(producer.push_with_len(99).unwrap(), tracked);
    }

    #[test]
    fn test_send_to_thread() {
        let (producer, consumer) = channel::<usize>(16);

        let handle = std::thread::spawn(move || {
            for i in 0..10 {
                producer.push(i).unwrap();
            }
        });
        handle.join().unwrap();

        for i in 0..10 {
            assert_eq!(consumer.pop(), Some(i));
        }
    }

    #[test]
    fn test_concurrent_push_pop() {
        let (producer, consumer) = channel::<usize>(64);
        let count = 10_000usize;

        let producer_handle = std::thread::spawn(move || {
            for i in 0..count {
                while producer.push(i).is_err() {
                    std::hint::spin_loop();
                }
            }
        });

        let consumer_handle = std::thread::spawn(move || {
            let mut received = Vec::with_capacity(count);
            while received.len() < count {
                if let Some(item) = consumer.pop() {
                    received.push(item);
                } else {
                    std::hint::spin_loop();
                }
            }
            received
        });

        producer_handle.join().unwrap();
        let received = consumer_handle.join().unwrap();

        for (i, &val) in received.iter().enumerate() {
            assert_eq!(val, i);
        }
    }

    #[test]
    fn test_boxed_payload_custody() {
        let (producer, consumer) = channel::<Box<String>>(8);

        producer.push(Box::new("hello".to_string())).unwrap();
        producer.push(Box::new("world".to_string())).unwrap();

        assert_eq!(*consumer.pop().unwrap(), "hello");
        assert_eq!(*consumer.pop().unwrap(), "world");
        assert!(consumer.pop().is_none());
    }

    #[test]
    fn test_drop_drains_undelivered() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let drop_count = Arc::new(AtomicUsize::new(0));

        #[derive(Debug)]
        struct DropCounter(Arc<AtomicUsize>);
        impl Drop for DropCounter {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let (producer, consumer) = channel::<Box<DropCounter>>(8);
        for _ in 0..3 {
            producer
                .push(Box::new(DropCounter(Arc::clone(&drop_count))))
                .unwrap();
        }
        assert_eq!(drop_count.load(Ordering::SeqCst), 0);

        drop(producer);
        drop(consumer);
        assert_eq!(drop_count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_pop_blocking_timeout() {
        let (_producer, consumer) = channel::<usize>(8);
        let got = consumer.pop_blocking(Timeout::Duration(Duration::from_millis(5)));
        assert_eq!(got, None);
    }

    #[test]
    fn test_push_blocking_timeout() {
        let (producer, _consumer) = channel::<usize>(2);
        producer.push(1).unwrap();
        let res = producer.push_blocking(2, Timeout::Duration(Duration::from_millis(5)));
        assert_eq!(res, Err(2));
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn test_rejects_non_power_of_two() {
        let _ = channel::<usize>(6);
    }
}
