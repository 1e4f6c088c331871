//! Lock-free single-producer ring queues for threads and shared memory.
//!
//! rotor moves opaque, pointer-sized values between threads (or processes
//! sharing memory) without blocking, locking, or allocating on the hot
//! path. There is always exactly one producer; the consumer side is either
//! exclusive (SPSC) or any number of threads racing to claim entries via
//! compare-and-swap (SPMC). Every operation returns immediately with an
//! explicit outcome: full, empty, or lost race. Nothing ever waits.
//!
//! # Layers
//!
//! - [`ring`] - the core: a fixed-size control block plus five
//!   enqueue/dequeue variants, operating on an externally owned slot array
//! - [`word`] - the [`Word`] conversion seam between typed payloads and the
//!   machine word the ring carries
//! - [`sync`] - typed heap-backed channels for inter-thread use
//! - [`ipc`] - word queues over POSIX shared memory for cross-process use
//!
//! # Example
//!
//! ```
//! use rotor::sync::spsc;
//!
//! let (producer, consumer) = spsc::channel::<usize>(1024);
//!
//! std::thread::spawn(move || {
//!     for i in 0..100 {
//!         while producer.push(i).is_err() {
//!             std::hint::spin_loop();
//!         }
//!     }
//! });
//!
//! let mut received = 0;
//! while received < 100 {
//!     if let Some(value) = consumer.pop() {
//!         assert_eq!(value, received);
//!         received += 1;
//!     }
//! }
//! ```
//!
//! # Capacity
//!
//! Capacities are powers of two, fixed at construction. One slot is
//! permanently sacrificed to tell a full ring from an empty one, so a
//! capacity-`n` queue holds at most `n - 1` entries. A system that needs
//! resizing swaps whole queues; the primitive itself never grows.

pub mod ipc;
pub mod ring;
pub mod sync;
pub mod trace;
pub mod word;

pub use ring::{Ring, Slot};
pub use word::Word;
