//! Core lock-free ring algorithm: one control block, five operation variants.
//!
//! This module provides the fundamental single-producer ring used by both:
//! - [`crate::sync`] - In-process queues over heap memory
//! - [`crate::ipc`] - Cross-process queues over POSIX shared memory
//!
//! The control block ([`Ring`]) and the slot storage ([`Slot`] array) are
//! deliberately separate: the control block holds only the counters and
//! capacity bookkeeping, while the slot array is allocated and owned by the
//! caller. This keeps the algorithm independent of where the storage lives
//! (heap, static, shared memory).
//!
//! # Topologies
//!
//! There is always exactly one producer. The consumer side comes in two
//! flavors served by the same control block:
//!
//! - **SPSC**: one consumer, exclusive dequeue ([`Ring::pop_sc`])
//! - **SPMC**: any number of consumers racing to claim entries via
//!   compare-and-swap ([`Ring::try_pop_mc`], [`Ring::pop_mc`])
//!
//! # Full/empty disambiguation
//!
//! One slot is permanently sacrificed: the ring reports full when
//! `(tail + 1) & mask == head & mask`, so an occupancy of `capacity` can
//! never occur and `head == tail` always means empty. Usable capacity is
//! `capacity - 1`.
//!
//! # Safety
//!
//! The operations have unsafe APIs because they require the caller to uphold
//! the role invariants: at most one thread in `push`/`push_with_len` at any
//! time, at most one thread in `pop_sc` at any time, and the same slot array
//! (of length `capacity`) passed to every operation on a given ring.

use std::sync::atomic::{AtomicUsize, Ordering, fence};

/// A single storage cell holding one opaque machine word.
///
/// Slots are atomic because multi-consumer dequeues read a slot
/// *speculatively*, before the compare-and-swap confirms ownership. A losing
/// consumer's read may overlap a wrapped producer's write to the same
/// location; the atomic access keeps that overlap well-defined, and the
/// loser simply discards what it read.
#[repr(transparent)]
pub struct Slot(AtomicUsize);

impl Slot {
    /// Creates an empty slot.
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicUsize::new(0))
    }
}

impl Default for Slot {
    fn default() -> Self {
        Self::new()
    }
}

/// Consumer-side control state: the head index.
///
/// Written only by the consumer side. Under SPMC the writes are serialized
/// through compare-and-swap, so there is still a single logical writer.
#[repr(C)]
#[repr(align(64))]
pub struct ConsumerState {
    /// Next position to claim for reading. Free-running, wraps at the
    /// machine word boundary.
    head: AtomicUsize,
}

/// Producer-side control state: the tail index.
///
/// Written exclusively by the single producer.
#[repr(C)]
#[repr(align(64))]
pub struct ProducerState {
    /// Next position to write to. Free-running, wraps at the machine word
    /// boundary.
    tail: AtomicUsize,
}

/// Fixed-size ring control block.
///
/// `#[repr(C)]` with cache-line-aligned index fields: the consumer head and
/// producer tail live on separate cache lines so the two sides do not bounce
/// a line between cores on every operation. When a `Ring` is placed in
/// memory shared across independently built binaries, this field order and
/// padding become a binary compatibility contract.
#[repr(C)]
pub struct Ring {
    /// Consumer head, own cache line.
    consumer: ConsumerState,

    /// Producer tail, own cache line.
    producer: ProducerState,

    /// Total slot count. Fixed at construction; must be a power of two.
    capacity: usize,

    /// `capacity - 1`, derived once at construction.
    mask: usize,
}

impl Ring {
    /// Creates a control block for a slot array of `capacity` elements.
    ///
    /// `capacity` must be a power of two and at least 2 (usable capacity is
    /// `capacity - 1`). This is an unchecked contract: release builds do not
    /// verify it, and a non-power-of-two capacity silently breaks the index
    /// arithmetic. Construction seams (channel constructors, shared-memory
    /// segments) are expected to enforce it before reaching this point.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        debug_assert!(
            capacity.is_power_of_two() && capacity >= 2,
            "ring capacity must be a power of two >= 2, got {capacity}"
        );
        Self {
            consumer: ConsumerState {
                head: AtomicUsize::new(0),
            },
            producer: ProducerState {
                tail: AtomicUsize::new(0),
            },
            capacity,
            mask: capacity.wrapping_sub(1),
        }
    }

    /// Returns the total slot count (usable capacity is one less).
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns a snapshot of the occupied slot count.
    ///
    /// This is advisory: the two index loads are not a single atomic
    /// observation, so the value may be stale with respect to concurrent
    /// pushes and pops the moment it is returned.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        let head = self.consumer.head.load(Ordering::Acquire);
        let tail = self.producer.tail.load(Ordering::Acquire);
        tail.wrapping_sub(head) & self.mask
    }

    /// Returns true if the occupancy snapshot is zero. Advisory, like
    /// [`len`](Self::len).
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Single-producer enqueue. Serves both the SPSC and SPMC topologies;
    /// the consumer side makes no difference to the producer.
    ///
    /// Returns `Err(entry)` if the ring is full. Failure has no side
    /// effects and the call is safe to retry after a consumer makes room.
    ///
    /// # Safety
    ///
    /// Caller must ensure:
    /// - At most one thread calls `push`/`push_with_len` on this ring at any
    ///   time (may run concurrently with any dequeue variant)
    /// - `slots` is the ring's storage array, `capacity` elements long
    #[inline]
    pub unsafe fn push(&self, slots: &[Slot], entry: usize) -> Result<(), usize> {
        debug_assert_eq!(slots.len(), self.capacity);
        let mask = self.mask;

        let head = self.consumer.head.load(Ordering::Acquire);
        // Only the producer writes tail, so its own read needs no ordering.
        let tail = self.producer.tail.load(Ordering::Relaxed);
        let next = tail.wrapping_add(1);

        if next & mask == head & mask {
            return Err(entry);
        }

        slots[tail & mask].0.store(entry, Ordering::Relaxed);

        // The slot write above must be visible before the new tail is.
        // Release on the index publish orders the two; a consumer that
        // acquires this tail value is guaranteed to see the slot contents.
        self.producer.tail.store(next, Ordering::Release);
        Ok(())
    }

    /// Single-producer enqueue that also reports the occupied count as it
    /// was immediately before this entry was published.
    ///
    /// The snapshot costs nothing extra: the producer already holds both
    /// index values for the full check, so backlog visibility comes without
    /// additional cross-thread traffic. On failure the ring held
    /// `capacity - 1` entries by definition and the rejected entry is
    /// returned.
    ///
    /// # Safety
    ///
    /// Same contract as [`push`](Self::push).
    #[inline]
    pub unsafe fn push_with_len(&self, slots: &[Slot], entry: usize) -> Result<usize, usize> {
        debug_assert_eq!(slots.len(), self.capacity);
        let mask = self.mask;

        let head = self.consumer.head.load(Ordering::Acquire);
        let tail = self.producer.tail.load(Ordering::Relaxed);
        let next = tail.wrapping_add(1);
        let len = tail.wrapping_sub(head) & mask;

        if next & mask == head & mask {
            return Err(entry);
        }

        slots[tail & mask].0.store(entry, Ordering::Relaxed);
        self.producer.tail.store(next, Ordering::Release);
        Ok(len)
    }

    /// Single-consumer dequeue (SPSC).
    ///
    /// Returns `None` if the ring is empty.
    ///
    /// # Safety
    ///
    /// Caller must ensure:
    /// - At most one thread calls `pop_sc` on this ring at any time, and no
    ///   thread calls the multi-consumer variants concurrently with it
    /// - `slots` is the ring's storage array, `capacity` elements long
    #[inline]
    pub unsafe fn pop_sc(&self, slots: &[Slot]) -> Option<usize> {
        debug_assert_eq!(slots.len(), self.capacity);

        // Only this consumer writes head, so its own read needs no ordering.
        let head = self.consumer.head.load(Ordering::Relaxed);
        // Pairs with the producer's release publish: the slot read below is
        // ordered after this load and therefore observes the slot write
        // that preceded the tail we see.
        let tail = self.producer.tail.load(Ordering::Acquire);

        if head == tail {
            return None;
        }

        let entry = slots[head & self.mask].0.load(Ordering::Relaxed);

        // The slot read must complete before the head publish: once the
        // producer acquires the new head it is free to overwrite the slot.
        self.consumer
            .head
            .store(head.wrapping_add(1), Ordering::Release);
        Some(entry)
    }

    /// Single-attempt optimistic multi-consumer dequeue (SPMC).
    ///
    /// Returns `None` if the ring is empty *or* if another consumer won the
    /// race for the current head; the two cases are indistinguishable to the
    /// caller, which decides whether to retry. The slot is read before
    /// ownership is confirmed; a losing attempt discards its speculative
    /// read and has no observable effect.
    ///
    /// # Safety
    ///
    /// Caller must ensure:
    /// - No thread calls `pop_sc` on this ring concurrently (any number of
    ///   threads may race through the multi-consumer variants)
    /// - `slots` is the ring's storage array, `capacity` elements long
    #[inline]
    pub unsafe fn try_pop_mc(&self, slots: &[Slot]) -> Option<usize> {
        debug_assert_eq!(slots.len(), self.capacity);

        let head = self.consumer.head.load(Ordering::Acquire);
        // The tail must represent state no older than our head snapshot;
        // reading it after (acquire) keeps the emptiness check coherent.
        let tail = self.producer.tail.load(Ordering::Acquire);

        if head == tail {
            return None;
        }

        // Speculative: ownership of this slot is not confirmed until the
        // compare-and-swap below succeeds. The producer cannot overwrite
        // slot `head` until the head counter advances past it, so the value
        // read here is stable for whichever consumer wins.
        let entry = slots[head & self.mask].0.load(Ordering::Relaxed);

        // The slot read must be serialized before the head update; without
        // this the claim could become visible first and license the
        // producer to overwrite the slot mid-read.
        fence(Ordering::SeqCst);

        if self
            .consumer
            .head
            .compare_exchange(
                head,
                head.wrapping_add(1),
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok()
        {
            Some(entry)
        } else {
            // Lost the race. The speculative read is discarded.
            None
        }
    }

    /// Retrying optimistic multi-consumer dequeue (SPMC).
    ///
    /// Returns `None` only when the ring is observed empty. A lost
    /// compare-and-swap retries with the head value the failed CAS
    /// observed, avoiding a redundant reload. Lock-free, not wait-free: a
    /// thread only retries because another consumer's claim succeeded, so
    /// the system as a whole always makes progress while an individual
    /// thread's progress is bounded only by contention.
    ///
    /// # Safety
    ///
    /// Same contract as [`try_pop_mc`](Self::try_pop_mc).
    #[inline]
    pub unsafe fn pop_mc(&self, slots: &[Slot]) -> Option<usize> {
        debug_assert_eq!(slots.len(), self.capacity);

        let mut head = self.consumer.head.load(Ordering::Acquire);
        loop {
            // Fresh tail each iteration, ordered against the current head
            // snapshot; emptiness is re-checked on every retry.
            let tail = self.producer.tail.load(Ordering::Acquire);

            if head == tail {
                return None;
            }

            // Speculative read, discarded if the claim below fails. A new
            // read is performed on every iteration; stale speculation is
            // never reused.
            let entry = slots[head & self.mask].0.load(Ordering::Relaxed);

            // Serialize the slot read before the claim (see try_pop_mc).
            fence(Ordering::SeqCst);

            match self.consumer.head.compare_exchange(
                head,
                head.wrapping_add(1),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(entry),
                // The failed CAS hands back the current head; reuse it
                // instead of reloading.
                Err(observed) => head = observed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring_with_slots(capacity: usize) -> (Ring, Box<[Slot]>) {
        let slots = (0..capacity).map(|_| Slot::new()).collect();
        (Ring::new(capacity), slots)
    }

    #[test]
    fn test_capacity_and_len() {
        for k in 1..8 {
            let capacity = 1 << k;
            let (ring, slots) = ring_with_slots(capacity);
            assert_eq!(ring.capacity(), capacity);
            assert_eq!(ring.len(), 0);
            assert!(ring.is_empty());

            // At most capacity - 1 entries fit.
            let mut pushed = 0;
            while unsafe { ring.push(&slots, pushed) }.is_ok() {
                pushed += 1;
            }
            assert_eq!(pushed, capacity - 1);
            assert_eq!(ring.len(), capacity - 1);
        }
    }

    #[test]
    fn test_fifo_order() {
        let (ring, slots) = ring_with_slots(16);

        for i in 0..15 {
            assert!(unsafe { ring.push(&slots, i) }.is_ok());
        }
        for i in 0..15 {
            assert_eq!(unsafe { ring.pop_sc(&slots) }, Some(i));
        }
        assert_eq!(unsafe { ring.pop_sc(&slots) }, None);
    }

    #[test]
    fn test_full_empty_boundary() {
        // Capacity 4 means 3 usable slots.
        let (ring, slots) = ring_with_slots(4);

        for i in 0..3 {
            assert!(unsafe { ring.push(&slots, i) }.is_ok());
        }
        assert_eq!(unsafe { ring.push(&slots, 99) }, Err(99));
        assert_eq!(ring.len(), 3);

        assert_eq!(unsafe { ring.pop_sc(&slots) }, Some(0));
        assert!(unsafe { ring.push(&slots, 3) }.is_ok());
        assert_eq!(unsafe { ring.push(&slots, 100) }, Err(100));
    }

    #[test]
    fn test_push_with_len_snapshot() {
        let (ring, slots) = ring_with_slots(8);

        let mut occupied = 0;
        for i in 0..7 {
            let reported = unsafe { ring.push_with_len(&slots, i) }.unwrap();
            assert_eq!(reported, occupied);
            occupied += 1;
        }
        assert_eq!(unsafe { ring.push_with_len(&slots, 7) }, Err(7));

        unsafe { ring.pop_sc(&slots) };
        assert_eq!(unsafe { ring.push_with_len(&slots, 7) }, Ok(6));
    }

    #[test]
    fn test_wrapping_laps() {
        // Drive the indices around the ring many times so the masked
        // arithmetic is exercised across wrap points.
        let (ring, slots) = ring_with_slots(4);

        for lap in 0..100usize {
            for i in 0..3 {
                assert!(unsafe { ring.push(&slots, lap * 3 + i) }.is_ok());
            }
            for i in 0..3 {
                assert_eq!(unsafe { ring.pop_sc(&slots) }, Some(lap * 3 + i));
            }
            assert!(ring.is_empty());
        }
    }

    #[test]
    fn test_mc_variants_single_threaded() {
        // Uncontended, the optimistic claims behave like the exclusive pop.
        let (ring, slots) = ring_with_slots(8);

        for i in 0..5 {
            assert!(unsafe { ring.push(&slots, i) }.is_ok());
        }
        assert_eq!(unsafe { ring.try_pop_mc(&slots) }, Some(0));
        assert_eq!(unsafe { ring.pop_mc(&slots) }, Some(1));
        assert_eq!(unsafe { ring.try_pop_mc(&slots) }, Some(2));
        assert_eq!(unsafe { ring.pop_mc(&slots) }, Some(3));
        assert_eq!(unsafe { ring.pop_mc(&slots) }, Some(4));
        assert_eq!(unsafe { ring.pop_mc(&slots) }, None);
        assert_eq!(unsafe { ring.try_pop_mc(&slots) }, None);
    }

    #[test]
    fn test_control_block_layout() {
        use std::mem::{align_of, offset_of, size_of};

        const CACHE_LINE: usize = 64;

        // Head and tail on separate cache lines; capacity/mask on a third.
        assert_eq!(align_of::<Ring>(), CACHE_LINE);
        assert_eq!(offset_of!(Ring, consumer), 0);
        assert_eq!(offset_of!(Ring, producer), CACHE_LINE);
        assert_eq!(offset_of!(Ring, capacity), 2 * CACHE_LINE);
        assert_eq!(size_of::<Ring>(), 3 * CACHE_LINE);
    }
}
