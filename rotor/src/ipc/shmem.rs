//! POSIX shared memory wrapper with type safety and automatic cleanup.
//!
//! A thin, safe layer over `shm_open`/`mmap`/`munmap`/`shm_unlink`:
//!
//! - [`Shm<T, Mode>`] - smart pointer to a shared memory mapping of `T`
//! - [`ShmSafe`] - trait marking types safe for cross-process placement
//! - [`Creator`] - typestate marker: creates the object, unlinks on drop
//! - [`Opener`] - typestate marker: opens an existing object, no unlink
//!
//! The typestate split keeps cleanup correct at compile time: exactly one
//! process owns the name and removes it, everyone else only unmaps.
//!
//! # Example
//!
//! ```no_run
//! use rotor::ipc::shmem::{Creator, Opener, Shm, ShmError, ShmSafe};
//! use std::sync::atomic::{AtomicU64, Ordering};
//!
//! #[repr(C)]
//! struct Counter {
//!     value: AtomicU64,
//! }
//!
//! // SAFETY: repr(C), no pointers, atomic access only, valid when zeroed.
//! unsafe impl ShmSafe for Counter {}
//!
//! // Process A
//! let counter = Shm::<Counter, Creator>::create("/my-counter", |_| {})?;
//! counter.value.store(42, Ordering::Release);
//!
//! // Process B
//! let counter = Shm::<Counter, Opener>::open("/my-counter")?;
//! assert_eq!(counter.value.load(Ordering::Acquire), 42);
//! # Ok::<(), ShmError>(())
//! ```

use std::marker::PhantomData;
use std::mem::{MaybeUninit, size_of};
use std::ops::Deref;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::ptr::{NonNull, null_mut};
use std::time::Duration;

use rustix::fs::{Mode, fstat, ftruncate};
use rustix::mm::{MapFlags, ProtFlags, mmap, munmap};
use rustix::{io, shm};
use thiserror::Error;

use crate::trace::{debug, trace};

/// Result alias for shared memory operations.
pub type Result<T> = std::result::Result<T, ShmError>;

/// Errors produced by [`Shm`] and the queue endpoints built on it.
#[derive(Debug, Error)]
pub enum ShmError {
    /// The provided POSIX shared memory name is invalid.
    #[error("invalid shared memory path `{path}`: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    /// `shm_open`, `mmap`, `ftruncate`, etc. failed with an errno.
    #[error("{op} failed for `{path}`: {source}")]
    Posix {
        op: &'static str,
        path: String,
        source: io::Errno,
    },

    /// The existing shared memory object has a different size than `T`.
    #[error("shared memory `{path}` size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        path: String,
        expected: usize,
        actual: i64,
    },

    /// The creating process did not finish initialization in time.
    #[error("shared memory `{path}` was not initialized within {timeout:?}")]
    InitTimeout { path: String, timeout: Duration },
}

impl ShmError {
    fn posix(op: &'static str, path: &str, source: io::Errno) -> Self {
        Self::Posix {
            op,
            path: path.to_string(),
            source,
        }
    }
}

/// Cleanup behavior selector for [`Shm`]. Implemented by [`Creator`] and
/// [`Opener`]; not meant for implementation outside this module.
pub trait ShmMode {
    /// Whether to unlink the shared memory name on drop.
    const SHOULD_UNLINK: bool;
}

/// Typestate marker for the process that creates the shared memory object.
/// Drop unmaps the memory **and unlinks the name**.
pub struct Creator;
impl ShmMode for Creator {
    const SHOULD_UNLINK: bool = true;
}

/// Typestate marker for processes that open an existing object. Drop only
/// unmaps; the name persists until the creator removes it.
pub struct Opener;
impl ShmMode for Opener {
    const SHOULD_UNLINK: bool = false;
}

/// Types safe to place in POSIX shared memory across processes.
///
/// # Safety
///
/// Implementers must guarantee all of:
///
/// - **Layout**: `#[repr(C)]` or `#[repr(transparent)]`; the processes
///   mapping the object may be compiled separately.
/// - **No pointers**: no references, `Box`, `Vec`, `String`, or raw
///   addresses as fields; virtual addresses do not transfer between
///   processes.
/// - **Valid when zeroed**: freshly created objects are zero-filled by
///   `ftruncate`; the all-zero bit pattern must be a valid (if blank) value
///   of the type.
/// - **Drop-free safety**: process crashes skip destructors; the type must
///   not rely on `Drop` for safety.
/// - **Concurrency**: `Send + Sync`, with all cross-process mutation going
///   through atomics.
pub unsafe trait ShmSafe: Send + Sync {}

macro_rules! impl_shm_safe {
    ($($t:ty),* $(,)?) => {
        $(
            // SAFETY: primitive scalar or atomic; fixed layout, no
            // pointers, zero is valid, no Drop.
            unsafe impl ShmSafe for $t {}
        )*
    };
}

use std::sync::atomic::{
    AtomicBool, AtomicI8, AtomicI16, AtomicI32, AtomicI64, AtomicIsize, AtomicU8, AtomicU16,
    AtomicU32, AtomicU64, AtomicUsize,
};

impl_shm_safe! {
    i8, i16, i32, i64, i128, isize,
    u8, u16, u32, u64, u128, usize,
    f32, f64,
    bool,
    AtomicBool,
    AtomicI8, AtomicI16, AtomicI32, AtomicI64, AtomicIsize,
    AtomicU8, AtomicU16, AtomicU32, AtomicU64, AtomicUsize,
}

// SAFETY: arrays inherit every property from their element type.
unsafe impl<T: ShmSafe, const N: usize> ShmSafe for [T; N] {}

const POSIX_NAME_MAX: usize = 255;

/// Validates a name against the portable `shm_open` requirements: a single
/// leading `/`, no further slashes, at most `NAME_MAX` bytes.
fn validate_path(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(ShmError::InvalidPath {
            path: path.to_string(),
            reason: "path must start with '/'",
        });
    }
    if path[1..].contains('/') {
        return Err(ShmError::InvalidPath {
            path: path.to_string(),
            reason: "path must not contain additional '/' characters",
        });
    }
    if path.len() > POSIX_NAME_MAX {
        return Err(ShmError::InvalidPath {
            path: path.to_string(),
            reason: "path length must be <= 255 bytes",
        });
    }
    Ok(())
}

/// Smart pointer to a shared memory mapping of `T`.
///
/// Derefs to `&T` for the lifetime of the value; cleanup on drop follows
/// the `Mode` typestate. Both processes see the same physical pages through
/// their own virtual addresses.
pub struct Shm<T: ShmSafe, Mode: ShmMode> {
    ptr: NonNull<T>,
    size: usize,
    path: String,
    _mode: PhantomData<Mode>,
}

// SAFETY: the pointer targets shared memory, not thread-local data, and
// ShmSafe already requires Send + Sync of T.
unsafe impl<T: ShmSafe, Mode: ShmMode> Send for Shm<T, Mode> {}
unsafe impl<T: ShmSafe, Mode: ShmMode> Sync for Shm<T, Mode> {}

impl<T: ShmSafe> Shm<T, Creator> {
    /// Creates a new shared memory object sized for `T`, maps it, and runs
    /// `init` on the zero-filled mapping before returning.
    ///
    /// The mapping starts zero-filled (a valid blank `T` per the [`ShmSafe`]
    /// contract); `init` performs any in-place setup that must precede
    /// visibility to other processes, typically writing a control block and
    /// then release-storing a ready marker. If `init` panics, the object is
    /// unmapped and unlinked before the panic resumes.
    ///
    /// # Errors
    ///
    /// `EEXIST` (name already exists), `EACCES` (permissions), `ENOMEM`
    /// (resources), or an invalid path.
    pub fn create(path: &str, init: impl FnOnce(&mut MaybeUninit<T>)) -> Result<Self> {
        validate_path(path)?;

        let fd = shm::open(
            path,
            shm::OFlags::CREATE | shm::OFlags::EXCL | shm::OFlags::RDWR,
            Mode::RUSR | Mode::WUSR,
        )
        .map_err(|err| ShmError::posix("shm_open", path, err))?;

        if let Err(err) = ftruncate(&fd, size_of::<T>() as u64) {
            drop(fd);
            let _ = shm::unlink(path);
            return Err(ShmError::posix("ftruncate", path, err));
        }

        // SAFETY: fresh mapping of a new kernel object; fd is valid, the
        // object was just sized to size_of::<T>(), mmap returns page-aligned
        // addresses satisfying any T alignment, and nothing else in this
        // process aliases the region.
        let mapped = unsafe {
            mmap(
                null_mut(),
                size_of::<T>(),
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &fd,
                0,
            )
        };
        let ptr = match mapped {
            Ok(p) => p,
            Err(err) => {
                drop(fd);
                let _ = shm::unlink(path);
                return Err(ShmError::posix("mmap", path, err));
            }
        };

        // SAFETY: mmap never returns null on success.
        let ptr = unsafe { NonNull::new_unchecked(ptr as *mut T) };

        let shm = Self {
            ptr,
            size: size_of::<T>(),
            path: path.to_string(),
            _mode: PhantomData,
        };

        let init_result = catch_unwind(AssertUnwindSafe(|| {
            // SAFETY: exclusive access; the object was created with EXCL
            // and no other handle exists yet. The cast to MaybeUninit<T> is
            // layout-identical.
            let uninit = unsafe { &mut *shm.ptr.as_ptr().cast::<MaybeUninit<T>>() };
            init(uninit);
        }));

        match init_result {
            Ok(()) => {
                debug!(path, size = shm.size, "created shared memory segment");
                Ok(shm)
            }
            Err(payload) => {
                // Unmap and unlink before the panic continues.
                drop(shm);
                resume_unwind(payload);
            }
        }
    }
}

impl<T: ShmSafe> Shm<T, Opener> {
    /// Opens an existing shared memory object and maps it.
    ///
    /// The object's size must equal `size_of::<T>()` exactly; a mismatch
    /// means the two sides were built against different layouts and the
    /// mapping is refused.
    ///
    /// # Errors
    ///
    /// `ENOENT` (no such object), `EACCES` (permissions), size mismatch, or
    /// an invalid path.
    pub fn open(path: &str) -> Result<Self> {
        validate_path(path)?;

        let fd = shm::open(path, shm::OFlags::RDWR, Mode::empty())
            .map_err(|err| ShmError::posix("shm_open", path, err))?;

        let stat = match fstat(&fd) {
            Ok(stat) => stat,
            Err(err) => {
                drop(fd);
                return Err(ShmError::posix("fstat", path, err));
            }
        };
        if stat.st_size != size_of::<T>() as i64 {
            drop(fd);
            return Err(ShmError::SizeMismatch {
                path: path.to_string(),
                expected: size_of::<T>(),
                actual: stat.st_size,
            });
        }

        // SAFETY: fd refers to an existing object whose size was just
        // verified; mmap returns page-aligned addresses; the mapping does
        // not alias any local object. Content validity across processes is
        // the ShmSafe contract.
        let mapped = unsafe {
            mmap(
                null_mut(),
                size_of::<T>(),
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &fd,
                0,
            )
        };
        let ptr = match mapped {
            Ok(p) => p,
            Err(err) => {
                drop(fd);
                return Err(ShmError::posix("mmap", path, err));
            }
        };

        // SAFETY: mmap never returns null on success.
        let ptr = unsafe { NonNull::new_unchecked(ptr as *mut T) };

        debug!(path, size = size_of::<T>(), "opened shared memory segment");
        Ok(Self {
            ptr,
            size: size_of::<T>(),
            path: path.to_string(),
            _mode: PhantomData,
        })
    }
}

impl<T: ShmSafe, Mode: ShmMode> Drop for Shm<T, Mode> {
    fn drop(&mut self) {
        // SAFETY: ptr/size describe the mapping established at construction
        // and nothing has unmapped it since.
        unsafe {
            let _ = munmap(self.ptr.as_ptr() as *mut _, self.size);
        }
        if Mode::SHOULD_UNLINK {
            trace!(path = self.path.as_str(), "unlinking shared memory segment");
            let _ = shm::unlink(&self.path);
        }
    }
}

impl<T: ShmSafe, Mode: ShmMode> Deref for Shm<T, Mode> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the mapping is valid for the lifetime of self and T is
        // ShmSafe (valid for any observed bit pattern, atomics for shared
        // mutation).
        unsafe { self.ptr.as_ref() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[repr(C)]
    struct Counter {
        value: AtomicU64,
    }

    // SAFETY: repr(C), a single atomic field, zero is a valid start state.
    unsafe impl ShmSafe for Counter {}

    /// Permission failures are environmental (sandboxes without /dev/shm
    /// access), not bugs; skip rather than fail.
    fn skip_on_access_denied(err: &ShmError, test: &str) -> bool {
        if let ShmError::Posix { source, .. } = err
            && *source == io::Errno::ACCESS
        {
            eprintln!("skipping {test}: {err}");
            return true;
        }
        false
    }

    #[test]
    fn test_create_open_roundtrip() -> Result<()> {
        let path = format!("/rotor-shmem-roundtrip-{}", std::process::id());
        let _ = shm::unlink(path.as_str());

        let counter = match Shm::<Counter, Creator>::create(&path, |_| {}) {
            Ok(counter) => counter,
            Err(err) if skip_on_access_denied(&err, "test_create_open_roundtrip") => {
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        counter.value.store(100, Ordering::SeqCst);

        {
            let opened = Shm::<Counter, Opener>::open(&path)?;
            assert_eq!(opened.value.load(Ordering::SeqCst), 100);
            opened.value.store(200, Ordering::SeqCst);
        } // opener drops: unmap only

        assert_eq!(counter.value.load(Ordering::SeqCst), 200);
        Ok(())
    }

    #[test]
    fn test_open_size_mismatch() -> Result<()> {
        #[repr(C)]
        struct Larger {
            a: AtomicU64,
            b: AtomicU64,
        }
        // SAFETY: as Counter.
        unsafe impl ShmSafe for Larger {}

        let path = format!("/rotor-shmem-mismatch-{}", std::process::id());
        let _ = shm::unlink(path.as_str());

        let _small = match Shm::<Counter, Creator>::create(&path, |_| {}) {
            Ok(shm) => shm,
            Err(err) if skip_on_access_denied(&err, "test_open_size_mismatch") => return Ok(()),
            Err(err) => return Err(err),
        };

        match Shm::<Larger, Opener>::open(&path) {
            Err(ShmError::SizeMismatch {
                expected, actual, ..
            }) => {
                assert_eq!(expected, size_of::<Larger>());
                assert_eq!(actual, size_of::<Counter>() as i64);
            }
            Err(err) => panic!("expected SizeMismatch, got: {err}"),
            Ok(_) => panic!("expected SizeMismatch, but open() succeeded"),
        }
        Ok(())
    }

    #[test]
    fn test_validate_path() {
        assert!(validate_path("/valid").is_ok());
        assert!(validate_path("/valid-name_123").is_ok());

        assert!(matches!(
            validate_path("no-slash"),
            Err(ShmError::InvalidPath { reason, .. }) if reason.contains("start with")
        ));
        assert!(matches!(
            validate_path("/foo/bar"),
            Err(ShmError::InvalidPath { reason, .. }) if reason.contains("additional")
        ));

        let long = format!("/{}", "a".repeat(255));
        assert!(validate_path(&long).is_err());
        let max = format!("/{}", "a".repeat(254));
        assert!(validate_path(&max).is_ok());
    }
}
