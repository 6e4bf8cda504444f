//! Basic lock-free SPSC queue.
//!
//! Two atomic indices, one written by each side, synchronized purely with
//! acquire/release:
//!
//! ```text
//! Producer                              Consumer
//! ────────────────────────              ────────────────────────
//! w = write.load(Relaxed)               r = read.load(Relaxed)
//! if next(w) == read.load(Acquire)      if r == write.load(Acquire)
//!     -> full                               -> empty
//! slot[w] = value                       value = slot[r]
//! write.store(next(w), Release)  ───►   read.store(next(r), Release)
//! ```
//!
//! The release store of `write` publishes a fully written slot to the
//! consumer's acquire load; the release store of `read` hands the vacated
//! slot back to the producer. Nothing blocks: a full or empty queue is
//! reported and the caller decides whether to spin, yield or back off.
//!
//! Both indices sit next to each other in memory. Every producer store
//! invalidates the line the consumer reads and vice versa; see
//! [`padded`](crate::padded) for the fix.
//!
//! # Example
//!
//! ```
//! use nexus_spsc::basic;
//!
//! let (mut tx, mut rx) = basic::queue::<u32>(2);
//!
//! assert!(tx.push(1).is_ok());
//! assert!(tx.push(2).is_ok());
//! assert!(tx.push(3).is_err()); // Full
//!
//! assert_eq!(rx.pop(), Some(1));
//! assert_eq!(rx.pop(), Some(2));
//! assert_eq!(rx.pop(), None);
//! ```

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::alloc::{Global, SlotAllocator};
use crate::config::Builder;
use crate::error::{Full, QueueError};
use crate::storage::RingStorage;
use crate::trace::trace;
use crate::{Pop, Push};

/// Creates a queue holding at most `capacity` elements.
///
/// Returns a `(Producer, Consumer)` pair. Use [`Builder`] for a custom
/// allocator or to handle construction errors.
///
/// # Panics
///
/// Panics if `capacity` is 0 or the storage cannot be allocated.
pub fn queue<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    match Builder::new(capacity).build_basic() {
        Ok(pair) => pair,
        Err(err) => panic!("basic::queue: {err}"),
    }
}

pub(crate) fn build<T, A: SlotAllocator>(
    capacity: usize,
    allocator: A,
) -> Result<(Producer<T, A>, Consumer<T, A>), QueueError> {
    let storage = RingStorage::allocate(capacity, 0, allocator)?;

    let shared = Arc::new(Shared {
        write: AtomicUsize::new(0),
        read: AtomicUsize::new(0),
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
    /// Producer's write position. Written by producer, read by consumer.
    write: AtomicUsize,
    /// Consumer's read position. Written by consumer, read by producer.
    read: AtomicUsize,
    storage: RingStorage<T, A>,
}

impl<T, A: SlotAllocator> Drop for Shared<T, A> {
    // `dropped` only feeds the trace event.
    #[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
    fn drop(&mut self) {
        // Sole owner: both endpoints are gone
        let read = *self.read.get_mut();
        let write = *self.write.get_mut();
        let dropped = unsafe { self.storage.drain(read, write) };
        trace!(dropped, "basic queue drained on destroy");
    }
}

/// The push side of a [`basic`](self) queue.
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

        // Only we write this index
        let write = shared.write.load(Ordering::Relaxed);
        let next = shared.storage.next(write);

        if next == shared.read.load(Ordering::Acquire) {
            return Err(Full(value));
        }

        // Safety: the slot at `write` is vacant and only the producer
        // touches it until `write` is published
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
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

/// The pop side of a [`basic`](self) queue.
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

        // Safety: the acquire load above observed this slot published
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

        // Safety: published, and `read` cannot advance while `&self` is
        // borrowed because pop/discard need `&mut self`
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
    ///
    /// Values pushed before the drop can still be popped.
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
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn capacity_two() {
        let (mut tx, mut rx) = queue::<i32>(2);

        assert!(tx.push(1).is_ok());
        assert_eq!(tx.len(), 1);
        assert!(tx.push(2).is_ok());
        assert_eq!(tx.len(), 2);
        assert_eq!(tx.push(3), Err(Full(3)));

        assert_eq!(rx.pop(), Some(1));
        assert_eq!(rx.pop(), Some(2));
        assert_eq!(rx.pop(), None);
        assert!(rx.is_empty());
    }

    #[test]
    fn wraparound() {
        let (mut tx, mut rx) = queue::<u64>(3);

        for lap in 0..100 {
            for i in 0..3 {
                tx.push(lap * 3 + i).unwrap();
            }
            assert!(tx.push(0).is_err());
            for i in 0..3 {
                assert_eq!(rx.pop(), Some(lap * 3 + i));
            }
        }
    }

    #[test]
    fn len_from_both_sides() {
        let (mut tx, mut rx) = queue::<u64>(4);

        tx.push(1).unwrap();
        tx.push(2).unwrap();
        tx.push(3).unwrap();
        rx.pop().unwrap();

        assert_eq!(tx.len(), 2);
        assert_eq!(rx.len(), 2);

        // Push across the wrap point
        tx.push(4).unwrap();
        tx.push(5).unwrap();
        assert_eq!(rx.len(), 4);
    }

    #[test]
    fn front_and_discard() {
        let (mut tx, mut rx) = queue::<String>(4);

        assert!(rx.front().is_none());
        assert!(!rx.discard());

        tx.push("first".into()).unwrap();
        tx.push("second".into()).unwrap();

        assert_eq!(rx.front().map(String::as_str), Some("first"));
        assert!(rx.discard());
        assert_eq!(rx.front().map(String::as_str), Some("second"));
        assert_eq!(rx.pop().as_deref(), Some("second"));
    }

    #[test]
    fn disconnect_observed() {
        let (mut tx, rx) = queue::<u64>(4);
        assert!(!tx.is_disconnected());
        drop(rx);
        assert!(tx.is_disconnected());
        // Still usable; nobody will ever pop
        tx.push(1).unwrap();
    }

    #[test]
    fn drops_remaining_on_destroy() {
        static DROPS: AtomicUsize = AtomicUsize::new(0);

        struct Counted;
        impl Drop for Counted {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::SeqCst);
            }
        }

        let (mut tx, mut rx) = queue::<Counted>(8);
        for _ in 0..5 {
            assert!(tx.push(Counted).is_ok());
        }
        drop(rx.pop());
        assert_eq!(DROPS.load(Ordering::SeqCst), 1);

        drop(tx);
        assert_eq!(DROPS.load(Ordering::SeqCst), 1);
        drop(rx);
        assert_eq!(DROPS.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn cross_thread() {
        use std::thread;

        let (mut tx, mut rx) = queue::<u64>(64);

        let handle = thread::spawn(move || {
            for i in 0..100_000u64 {
                while tx.push(i).is_err() {
                    std::hint::spin_loop();
                }
            }
        });

        let mut expected = 0u64;
        while expected < 100_000 {
            if let Some(val) = rx.pop() {
                assert_eq!(val, expected);
                expected += 1;
            }
        }

        handle.join().unwrap();
        assert!(rx.is_empty());
    }
}
