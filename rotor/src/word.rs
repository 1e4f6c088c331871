//! Payload conversion for the typed channel layer.
//!
//! The core ring moves exactly one opaque machine word per slot and never
//! interprets, copies, or frees it. The [`Word`] trait is the seam where
//! typed payloads become that word and come back out of it on the other
//! side. Anything larger than a word travels behind a pointer; wrapping
//! bigger payloads is the caller's concern, usually by boxing them.

use std::ptr::NonNull;

/// Conversion between a payload and the single machine word the ring moves.
///
/// The ring transfers logical custody: the producer relinquishes the value
/// on a successful enqueue and exactly one consumer reacquires it on a
/// successful dequeue. For owning payloads (`Box`) this round-trip is what
/// keeps the allocation from leaking or double-freeing.
///
/// # Safety
///
/// Implementations must guarantee that `from_word(into_word(x))`
/// reconstructs `x` exactly, and that `into_word` does not drop or alias
/// the value it consumes. Callers of [`from_word`](Word::from_word) must
/// only pass words produced by [`into_word`](Word::into_word) for the same
/// `Self`, and must not reconstruct an owning payload from the same word
/// twice.
pub unsafe trait Word: Sized {
    /// Consumes the payload, yielding the word the ring will carry.
    fn into_word(self) -> usize;

    /// Reconstructs the payload from a carried word.
    ///
    /// # Safety
    ///
    /// `word` must have come from [`into_word`](Word::into_word) on the same
    /// `Self` type, and for owning payloads each word must be reconstructed
    /// at most once.
    unsafe fn from_word(word: usize) -> Self;
}

// SAFETY: identity conversion.
unsafe impl Word for usize {
    #[inline]
    fn into_word(self) -> usize {
        self
    }

    #[inline]
    unsafe fn from_word(word: usize) -> Self {
        word
    }
}

// SAFETY: a raw pointer round-trips through its address; no ownership is
// attached.
unsafe impl<T> Word for *mut T {
    #[inline]
    fn into_word(self) -> usize {
        self as usize
    }

    #[inline]
    unsafe fn from_word(word: usize) -> Self {
        word as *mut T
    }
}

// SAFETY: as above.
unsafe impl<T> Word for *const T {
    #[inline]
    fn into_word(self) -> usize {
        self as usize
    }

    #[inline]
    unsafe fn from_word(word: usize) -> Self {
        word as *const T
    }
}

// SAFETY: NonNull is a non-zero address; into_word never produces 0, so
// reconstructing with new_unchecked is sound under the trait contract.
unsafe impl<T> Word for NonNull<T> {
    #[inline]
    fn into_word(self) -> usize {
        self.as_ptr() as usize
    }

    #[inline]
    unsafe fn from_word(word: usize) -> Self {
        // SAFETY: word came from into_word on a NonNull, hence non-zero.
        unsafe { NonNull::new_unchecked(word as *mut T) }
    }
}

// SAFETY: Box round-trips through into_raw/from_raw. Custody moves with the
// word: the producer side forgets the box, the winning consumer rebuilds
// it. The trait contract's reconstruct-once rule is exactly Box::from_raw's
// requirement.
unsafe impl<T> Word for Box<T> {
    #[inline]
    fn into_word(self) -> usize {
        Box::into_raw(self) as usize
    }

    #[inline]
    unsafe fn from_word(word: usize) -> Self {
        // SAFETY: word came from Box::into_raw via into_word and is
        // reconstructed exactly once per the trait contract.
        unsafe { Box::from_raw(word as *mut T) }
    }
}
