//! Shared-memory ring segment: layout and initialization protocol.
//!
//! A segment is everything one queue needs inside a single mapping:
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │ ReadyMarker     (64-byte aligned)      │
//! ├────────────────────────────────────────┤
//! │ Ring            (head | tail | cap/mask│
//! │                  on separate lines)    │
//! ├────────────────────────────────────────┤
//! │ Slots: [Slot; N]                       │
//! ├────────────────────────────────────────┤
//! │ Padding         (false sharing guard)  │
//! └────────────────────────────────────────┘
//! ```
//!
//! The layout is `#[repr(C)]` throughout: when producer and consumer are
//! independently built binaries, these offsets are the wire format.
//!
//! Initialization is cross-process: the creator writes the control block in
//! place and then release-stores a magic value into the marker; openers
//! spin with acquire loads until they observe it, which also makes every
//! prior write visible to them.

use std::mem::MaybeUninit;
use std::ptr::addr_of_mut;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::shmem::ShmSafe;
use crate::ring::{Ring, Slot};

/// Value the marker holds once the segment is fully initialized.
/// "ROTORING" in ASCII.
const READY_MAGIC: u64 = 0x524F_544F_5249_4E47;

/// Cross-process initialization marker.
#[repr(C)]
#[repr(align(64))]
pub(crate) struct ReadyMarker(AtomicU64);

// SAFETY: a single cache-line-aligned atomic; zero (not ready) is the valid
// blank state.
unsafe impl ShmSafe for ReadyMarker {}

// SAFETY: Slot is repr(transparent) over AtomicUsize; zero is the empty
// slot state; no pointers, no Drop.
unsafe impl ShmSafe for Slot {}

// SAFETY: Ring is repr(C) with atomic indices and plain-integer capacity
// bookkeeping; the all-zero pattern is a blank (uninitialized) control
// block, which the ready-marker protocol keeps unreachable from queue
// operations.
unsafe impl ShmSafe for Ring {}

/// One queue's worth of shared memory: marker + control block + storage.
#[repr(C)]
pub(crate) struct Segment<const N: usize> {
    ready: ReadyMarker,
    pub(crate) ring: Ring,
    pub(crate) slots: [Slot; N],
    _tail_pad: [u8; 64],
}

// SAFETY: repr(C) composition of ShmSafe fields plus inert padding.
unsafe impl<const N: usize> ShmSafe for Segment<N> {}

impl<const N: usize> Segment<N> {
    /// Compile-time assertion that the slot count is a power of two >= 2.
    pub(crate) const CAPACITY_OK: () = assert!(
        N.is_power_of_two() && N >= 2,
        "segment capacity must be a power of two >= 2"
    );

    /// Initializes a segment in place inside freshly created shared memory.
    ///
    /// Writes every field and only then publishes the ready magic with a
    /// release store, so an opener that observes the magic also observes
    /// the initialized control block. Must complete before any queue
    /// operation; the creating process's `create()` runs it under exclusive
    /// access.
    pub(crate) fn init_in_place(uninit: &mut MaybeUninit<Self>) {
        let ptr = uninit.as_mut_ptr();
        // SAFETY: `ptr` covers a writable, exclusively held Segment<N>;
        // every field is written before use.
        unsafe {
            addr_of_mut!((*ptr).ring).write(Ring::new(N));
            // Zero bytes are the empty state for slots and padding.
            addr_of_mut!((*ptr).slots).write_bytes(0, 1);
            addr_of_mut!((*ptr)._tail_pad).write_bytes(0, 1);
            addr_of_mut!((*ptr).ready).write(ReadyMarker(AtomicU64::new(0)));
            // Publish: pairs with the acquire loads in wait_ready.
            (*ptr).ready.0.store(READY_MAGIC, Ordering::Release);
        }
    }

    /// Spins until the creator has published the ready magic.
    ///
    /// Returns false on timeout. Safe to call on a zero-filled (not yet
    /// initialized) mapping: until the magic lands, the marker reads as
    /// blank and we keep spinning.
    pub(crate) fn wait_ready(&self, timeout: Duration) -> bool {
        let start = std::time::Instant::now();
        loop {
            if self.ready.0.load(Ordering::Acquire) == READY_MAGIC {
                return true;
            }
            if start.elapsed() >= timeout {
                return false;
            }
            std::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{align_of, offset_of, size_of};

    const CACHE_LINE: usize = 64;

    #[test]
    fn test_segment_layout_contract() {
        type Seg = Segment<16>;

        assert_eq!(align_of::<Seg>(), CACHE_LINE);
        assert_eq!(size_of::<ReadyMarker>(), CACHE_LINE);

        // Marker, then the three control cache lines, then storage.
        assert_eq!(offset_of!(Seg, ring), CACHE_LINE);
        assert_eq!(offset_of!(Seg, slots), 4 * CACHE_LINE);
        assert_eq!(
            size_of::<Seg>(),
            4 * CACHE_LINE + 16 * size_of::<usize>() + CACHE_LINE
        );
    }

    #[test]
    fn test_init_publishes_ready() {
        let mut uninit = MaybeUninit::<Segment<8>>::uninit();
        Segment::<8>::init_in_place(&mut uninit);
        // SAFETY: init_in_place fully initialized the segment.
        let segment = unsafe { uninit.assume_init_ref() };

        assert!(segment.wait_ready(Duration::from_millis(1)));
        assert_eq!(segment.ring.capacity(), 8);
        assert!(segment.ring.is_empty());
    }
}
