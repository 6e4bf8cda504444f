//! Lock-free SPSC queue with cache-line isolation.
//!
//! Same protocol as [`basic`](crate::basic), different memory layout:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │ write (cache-line padded) - producer write position   │
//! ├───────────────────────────────────────────────────────┤
//! │ read (cache-line padded) - consumer read position     │
//! └───────────────────────────────────────────────────────┘
//!
//! ┌──────────┬───────────────────────────────┬──────────┐
//! │ padding  │ slots[0 ..= capacity]         │ padding  │
//! └──────────┴───────────────────────────────┴──────────┘
//! ```
//!
//! - The producer's stores to `write` never invalidate the line holding
//!   `read`, and vice versa.
//! - `padding_slots::<T>(cache_line)` unused slots on each side keep the
//!   first and last live elements off any line shared with other memory.
//!
//! Purely a performance property: push/pop semantics are exactly those of
//! the basic queue.
//!
//! # Example
//!
//! ```
//! use nexus_spsc::padded;
//!
//! let (mut tx, mut rx) = padded::queue::<u64>(1024);
//!
//! tx.push(42).unwrap();
//! assert_eq!(rx.front(), Some(&42));
//! assert_eq!(rx.pop(), Some(42));
//! ```

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

use crate::alloc::{Global, SlotAllocator};
use crate::config::Builder;
use crate::error::{Full, QueueError};
use crate::storage::RingStorage;
use crate::trace::trace;
use crate::{Pop, Push};

/// Creates a padded queue holding at most `capacity` elements.
///
/// Storage padding is computed from [`CACHE_LINE_SIZE`](crate::CACHE_LINE_SIZE).
///
/// # Panics
///
/// Panics if `capacity` is 0 or the storage cannot be allocated.
pub fn queue<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    match Builder::new(capacity).build_padded() {
        Ok(pair) => pair,
        Err(err) => panic!("padded::queue: {err}"),
    }
}

pub(crate) fn build<T, A: SlotAllocator>(
    capacity: usize,
    padding: usize,
    allocator: A,
) -> Result<(Producer<T, A>, Consumer<T, A>), QueueError> {
    let storage = RingStorage::allocate(capacity, padding, allocator)?;

    let shared = Arc::new(Shared {
        write: CachePadded::new(AtomicUsize::new(0)),
        read: CachePadded::new(AtomicUsize::new(0)),
        storage,
    });

    Ok((
        Producer {
            shared: Arc::clone(&shared),
            _not_sync: PhantomData,
        },
        Consumer {
            shared,
            _not_sync: PhantomData,
        },
    ))
}

#[repr(C)]
struct Shared<T, A: SlotAllocator> {
    write: CachePadded<AtomicUsize>,
    read: CachePadded<AtomicUsize>,
    storage: RingStorage<T, A>,
}

impl<T, A: SlotAllocator> Drop for Shared<T, A> {
    // `dropped` only feeds the trace event.
    #[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
    fn drop(&mut self) {
        let read = *self.read.get_mut();
        let write = *self.write.get_mut();
        let dropped = unsafe { self.storage.drain(read, write) };
        trace!(dropped, "padded queue drained on destroy");
    }
}

/// The push side of a [`padded`](self) queue.
pub struct Producer<T, A: SlotAllocator = Global> {
    shared: Arc<Shared<T, A>>,
    /// `Send` but not `Sync`: one thread drives an endpoint at a time.
    _not_sync: PhantomData<Cell<()>>,
}

impl<T, A: SlotAllocator> Producer<T, A> {
    /// Attempts to push a value into the queue.
    ///
    /// # Errors
    ///
    /// Returns `Err(Full(value))` if the queue is full, giving the value back.
    #[inline]
    #[must_use = "push returns Err if full, which should be handled"]
    pub fn push(&mut self, value: T) -> Result<(), Full<T>> {
        let shared = &*self.shared;

        let write = shared.write.load(Ordering::Relaxed);
        let next = shared.storage.next(write);

        if next == shared.read.load(Ordering::Acquire) {
            return Err(Full(value));
        }

        unsafe { shared.storage.write(write, value) };
        shared.write.store(next, Ordering::Release);

        Ok(())
    }

    /// Returns the number of elements the queue can hold.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.storage.capacity()
    }

    /// Returns the number of elements currently in the queue.
    ///
    /// This is a snapshot and may be stale immediately.
    #[inline]
    pub fn len(&self) -> usize {
        let write = self.shared.write.load(Ordering::Relaxed);
        let read = self.shared.read.load(Ordering::Acquire);
        self.shared.storage.occupied(write, read)
    }

    /// Returns `true` if the queue is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the consumer has been dropped.
    #[inline]
    pub fn is_disconnected(&self) -> bool {
        Arc::strong_count(&self.shared) == 1
    }
}

impl<T, A: SlotAllocator> Push<T> for Producer<T, A> {
    #[inline]
    fn try_push(&mut self, value: T) -> Result<(), Full<T>> {
        self.push(value)
    }

    fn capacity(&self) -> usize {
        Self::capacity(self)
    }

    fn len(&self) -> usize {
        Self::len(self)
    }
}

impl<T, A: SlotAllocator> fmt::Debug for Producer<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("capacity", &self.capacity())
            .field("padding", &self.shared.storage.padding())
            .finish_non_exhaustive()
    }
}

/// The pop side of a [`padded`](self) queue.
pub struct Consumer<T, A: SlotAllocator = Global> {
    shared: Arc<Shared<T, A>>,
    /// `front(&self)` hands out `&T`, so the consumer must stay on one thread.
    _not_sync: PhantomData<Cell<()>>,
}

impl<T, A: SlotAllocator> Consumer<T, A> {
    /// Attempts to pop the oldest value from the queue.
    ///
    /// Returns `None` if the queue is empty.
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        let shared = &*self.shared;

        let read = shared.read.load(Ordering::Relaxed);
        if read == shared.write.load(Ordering::Acquire) {
            return None;
        }

        let value = unsafe { shared.storage.read(read) };
        shared.read.store(shared.storage.next(read), Ordering::Release);

        Some(value)
    }

    /// Removes and drops the oldest value without returning it.
    ///
    /// Returns `false` if the queue is empty.
    #[inline]
    pub fn discard(&mut self) -> bool {
        let shared = &*self.shared;

        let read = shared.read.load(Ordering::Relaxed);
        if read == shared.write.load(Ordering::Acquire) {
            return false;
        }

        unsafe { shared.storage.drop_in_place(read) };
        shared.read.store(shared.storage.next(read), Ordering::Release);

        true
    }

    /// Borrows the oldest value without removing it.
    ///
    /// Returns `None` if the queue is empty.
    #[inline]
    pub fn front(&self) -> Option<&T> {
        let shared = &*self.shared;

        let read = shared.read.load(Ordering::Relaxed);
        if read == shared.write.load(Ordering::Acquire) {
            return None;
        }

        Some(unsafe { shared.storage.get(read) })
    }

    /// Returns the number of elements the queue can hold.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.storage.capacity()
    }

    /// Returns the number of elements currently in the queue.
    ///
    /// This is a snapshot and may be stale immediately.
    #[inline]
    pub fn len(&self) -> usize {
        let read = self.shared.read.load(Ordering::Relaxed);
        let write = self.shared.write.load(Ordering::Acquire);
        self.shared.storage.occupied(write, read)
    }

    /// Returns `true` if the queue is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the producer has been dropped.
    #[inline]
    pub fn is_disconnected(&self) -> bool {
        Arc::strong_count(&self.shared) == 1
    }
}

impl<T, A: SlotAllocator> Pop<T> for Consumer<T, A> {
    #[inline]
    fn try_pop(&mut self) -> Option<T> {
        self.pop()
    }

    fn capacity(&self) -> usize {
        Self::capacity(self)
    }

    fn len(&self) -> usize {
        Self::len(self)
    }
}

impl<T, A: SlotAllocator> fmt::Debug for Consumer<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("capacity", &self.capacity())
            .field("padding", &self.shared.storage.padding())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CACHE_LINE_SIZE, padding_slots};

    #[test]
    fn indices_on_separate_lines() {
        let (tx, _rx) = queue::<u64>(8);
        let shared = &*tx.shared;

        let write = std::ptr::from_ref::<AtomicUsize>(&shared.write) as usize;
        let read = std::ptr::from_ref::<AtomicUsize>(&shared.read) as usize;

        assert_eq!(write % CACHE_LINE_SIZE, 0);
        assert_eq!(read % CACHE_LINE_SIZE, 0);
        assert!(read - write >= CACHE_LINE_SIZE);
    }

    #[test]
    fn storage_is_padded() {
        let (tx, _rx) = queue::<u64>(8);
        assert_eq!(tx.shared.storage.padding(), padding_slots::<u64>(CACHE_LINE_SIZE));

        let (tx, _rx) = Builder::new(8).cache_line(256).build_padded::<u32>().unwrap();
        assert_eq!(tx.shared.storage.padding(), 64);
    }

    #[test]
    fn full_then_space() {
        let (mut tx, mut rx) = queue::<u64>(4);

        for i in 1..=4 {
            tx.push(i).unwrap();
        }
        assert_eq!(tx.push(5), Err(Full(5)));

        assert_eq!(rx.pop(), Some(1));
        tx.push(5).unwrap();
        assert_eq!(rx.len(), 4);
    }

    #[test]
    fn large_struct() {
        #[derive(Debug, PartialEq)]
        struct LargeMessage {
            data: [u8; 256],
            id: u64,
        }

        let (mut tx, mut rx) = queue::<LargeMessage>(8);
        assert_eq!(tx.shared.storage.padding(), 1);

        tx.push(LargeMessage {
            data: [42; 256],
            id: 123,
        })
        .unwrap();

        assert_eq!(
            rx.pop(),
            Some(LargeMessage {
                data: [42; 256],
                id: 123,
            })
        );
    }

    #[test]
    fn cross_thread() {
        use std::thread;

        let (mut tx, mut rx) = queue::<u64>(128);

        let handle = thread::spawn(move || {
            for i in 0..100_000u64 {
                while tx.push(i).is_err() {
                    std::hint::spin_loop();
                }
            }
        });

        for expected in 0..100_000u64 {
            loop {
                if let Some(val) = rx.pop() {
                    assert_eq!(val, expected);
                    break;
                }
                std::hint::spin_loop();
            }
        }

        handle.join().unwrap();
    }
}
