//! # nexus-spsc
//!
//! Bounded single-producer single-consumer queues for handing values between
//! exactly two threads.
//!
//! The crate ships the same queue four times, each one a step further along
//! the latency curve:
//!
//! | Module | Synchronization | What it adds |
//! |--------|-----------------|--------------|
//! | [`blocking`] | `Mutex` + `Condvar` | Correctness baseline, callers sleep |
//! | [`basic`] | Acquire/release indices | Lock-free, callers poll |
//! | [`padded`] | Acquire/release indices | Cache-line isolation of indices and storage |
//! | [`cached`] | Acquire/release indices | Private shadow of the peer's index |
//!
//! ## Design Goals
//!
//! - One contiguous storage allocation per queue, made at construction
//! - No allocations after construction
//! - FIFO delivery with no loss or duplication
//! - `capacity()` is exactly what was asked for, for every variant
//!
//! ## Example
//!
//! ```
//! use nexus_spsc::cached;
//!
//! let (mut tx, mut rx) = cached::queue::<u64>(1024);
//!
//! tx.push(42).unwrap();
//! assert_eq!(rx.pop(), Some(42));
//! ```
//!
//! ## Endpoints
//!
//! Every constructor returns a `(Producer, Consumer)` pair sharing one heap
//! allocated queue. Push-side operations only exist on the producer, pop-side
//! operations only on the consumer, and both take `&mut self`, so the
//! single-producer single-consumer discipline is checked by the compiler.
//!
//! Endpoints cannot be copied or cloned:
//!
//! ```compile_fail
//! let (tx, _rx) = nexus_spsc::basic::queue::<u64>(8);
//! let second_producer = tx.clone();
//! ```
//!
//! ```compile_fail
//! let (_tx, rx) = nexus_spsc::padded::queue::<u64>(8);
//! let a = rx;
//! let b = rx; // use after move
//! ```
//!
//! Lock-free endpoints are `Send` but never `Sync`, so a consumer cannot be
//! shared between threads and `front()` borrows stay on the consumer's
//! thread. The [`blocking`] endpoints route every access through their
//! mutex.
//!
//! ```compile_fail
//! fn assert_sync<S: Sync>() {}
//! assert_sync::<nexus_spsc::basic::Consumer<std::cell::Cell<u8>>>();
//! ```
//!
//! ```compile_fail
//! fn assert_sync<S: Sync>() {}
//! assert_sync::<nexus_spsc::padded::Consumer<std::cell::Cell<u8>>>();
//! ```
//!
//! ```compile_fail
//! fn assert_sync<S: Sync>() {}
//! assert_sync::<nexus_spsc::cached::Consumer<u64>>();
//! ```
//!
//! ```compile_fail
//! fn assert_sync<S: Sync>() {}
//! assert_sync::<nexus_spsc::basic::Producer<u64>>();
//! ```
//!
//! ```
//! fn assert_send<S: Send>() {}
//! assert_send::<nexus_spsc::cached::Producer<std::cell::Cell<u8>>>();
//! assert_send::<nexus_spsc::cached::Consumer<std::cell::Cell<u8>>>();
//! ```
//!
//! Moving an endpoint moves a pointer. The indices and storage stay where
//! they were allocated until the last endpoint is dropped, at which point the
//! remaining elements are dropped in FIFO order and the storage is released.
//!
//! ## Generic code
//!
//! [`Push`] and [`Pop`] are implemented by every variant's endpoints:
//!
//! ```
//! use nexus_spsc::{Pop, Push};
//!
//! fn relay<P: Push<u32>, C: Pop<u32>>(tx: &mut P, rx: &mut C) -> u32 {
//!     tx.push_spin(7);
//!     rx.pop_spin()
//! }
//!
//! let (mut tx, mut rx) = nexus_spsc::blocking::queue::<u32>(4);
//! assert_eq!(relay(&mut tx, &mut rx), 7);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod alloc;
pub mod basic;
pub mod blocking;
pub mod cached;
pub mod config;
mod error;
pub mod padded;
mod storage;
pub mod trace;

use crossbeam_utils::Backoff;

#[cfg(unix)]
pub use alloc::MmapAllocator;
pub use alloc::{Global, SlotAllocator};
pub use config::{Builder, CACHE_LINE_SIZE, padding_slots};
pub use error::{AllocError, Full, QueueError};
pub use trace::init_tracing;

/// The push side of any queue in this crate.
///
/// Lets benchmarks and tests drive every variant through one code path.
pub trait Push<T> {
    /// Attempts to push without blocking.
    ///
    /// # Errors
    ///
    /// Returns `Err(Full(value))` if the queue is full.
    fn try_push(&mut self, value: T) -> Result<(), Full<T>>;

    /// Returns the number of elements the queue can hold.
    fn capacity(&self) -> usize;

    /// Returns a snapshot of the number of resident elements.
    fn len(&self) -> usize;

    /// Returns `true` if the snapshot length is zero.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pushes, retrying with exponential backoff until space frees up.
    ///
    /// This is a caller-side policy: spin first, then yield to the scheduler.
    /// It never returns if the consumer stops popping.
    fn push_spin(&mut self, value: T) {
        let backoff = Backoff::new();
        let mut value = value;
        loop {
            match self.try_push(value) {
                Ok(()) => return,
                Err(Full(v)) => value = v,
            }
            backoff.snooze();
        }
    }
}

/// The pop side of any queue in this crate.
pub trait Pop<T> {
    /// Attempts to pop the oldest element without blocking.
    fn try_pop(&mut self) -> Option<T>;

    /// Returns the number of elements the queue can hold.
    fn capacity(&self) -> usize;

    /// Returns a snapshot of the number of resident elements.
    fn len(&self) -> usize;

    /// Returns `true` if the snapshot length is zero.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pops, retrying with exponential backoff until an element arrives.
    fn pop_spin(&mut self) -> T {
        let backoff = Backoff::new();
        loop {
            if let Some(value) = self.try_pop() {
                return value;
            }
            backoff.snooze();
        }
    }
}
