//! Cross-process queues over POSIX shared memory.
//!
//! The same ring control block that drives the in-process channels can live
//! in a shared memory mapping, where its field order, widths, and padding
//! become a binary compatibility contract between independently built
//! processes. This module provides:
//!
//! - [`shmem`] - typed POSIX shared memory wrapper with typestate cleanup
//! - [`spsc`] - one producer process, one consumer process
//! - [`spmc`] - one producer process, any number of consumer processes
//!
//! Cross-process payloads are raw `usize` words. Pointers are process-local,
//! so what travels between processes is an index, an offset into a shared
//! region, or a small packed value, never an address.

use std::cell::Cell;
use std::marker::PhantomData;

pub mod shmem;
pub mod spmc;
pub mod spsc;

pub(crate) mod segment;

/// Marker type to opt-out of `Sync` while remaining `Send`.
pub(crate) type PhantomUnsync = PhantomData<Cell<&'static ()>>;
