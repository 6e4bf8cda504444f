//! Index-cached lock-free SPSC queue.
//!
//! The [`padded`](crate::padded) layout plus one more trick: each endpoint
//! keeps a private, non-atomic shadow of the *other* side's index and only
//! reloads the real atomic when the shadow says "full" (producer) or
//! "empty" (consumer).
//!
//! ```text
//! Producer                                  Consumer
//! ──────────────────────────────            ──────────────────────────────
//! w = write.load(Relaxed)                   r = read.load(Relaxed)
//! if next(w) == cached_read {               if r == cached_write {
//!     cached_read = read.load(Acquire)          cached_write = write.load(Acquire)
//!     if next(w) == cached_read -> full         if r == cached_write -> empty
//! }                                         }
//! slot[w] = value                           value = slot[r]
//! write.store(next(w), Release)             read.store(next(r), Release)
//! ```
//!
//! # Why the shadow is safe
//!
//! Indices only ever move forward around the ring. A shadow is an old value
//! of the peer's index, so it can only be *behind*:
//!
//! - a stale `cached_read` makes the producer see less free space than
//!   exists, never more - worst case it reloads;
//! - a stale `cached_write` makes the consumer see fewer elements than
//!   exist, never more - worst case it reloads.
//!
//! Both fast-path decisions are therefore conservative, and the acquire
//! load on the slow path restores exactly the synchronization of the basic
//! queue.
//!
//! # Performance Notes
//!
//! In steady-state streaming the producer is usually far ahead of the
//! consumer's last observed position, so the hot path performs:
//! - Zero cross-core atomic loads (the shadow is a plain field)
//! - One relaxed load of the endpoint's own index (its own cache line)
//! - One release store to publish
//!
//! The shared line holding the peer's index is only pulled across cores
//! once per "lap" of slack instead of once per operation.
//!
//! # Example
//!
//! ```
//! use nexus_spsc::cached;
//! use std::thread;
//!
//! let (mut tx, mut rx) = cached::queue::<u64>(1024);
//!
//! let producer = thread::spawn(move || {
//!     for i in 0..10_000 {
//!         while tx.push(i).is_err() {
//!             std::hint::spin_loop();
//!         }
//!     }
//! });
//!
//! let mut expected = 0;
//! while expected < 10_000 {
//!     if let Some(v) = rx.pop() {
//!         assert_eq!(v, expected);
//!         expected += 1;
//!     }
//! }
//! producer.join().unwrap();
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

/// Creates an index-cached queue holding at most `capacity` elements.
///
/// # Panics
///
/// Panics if `capacity` is 0 or the storage cannot be allocated.
pub fn queue<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    match Builder::new(capacity).build_cached() {
        Ok(pair) => pair,
        Err(err) => panic!("cached::queue: {err}"),
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
            cached_read: 0,
            _not_sync: PhantomData,
        },
        Consumer {
            shared,
            cached_write: 0,
            _not_sync: PhantomData,
        },
    ))
}

#[repr(C)]
struct Shared<T, A: SlotAllocator> {
    /// Producer's write position. Written by producer, read by consumer.
    write: CachePadded<AtomicUsize>,
    /// Consumer's read position. Written by consumer, read by producer.
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
        trace!(dropped, "cached queue drained on destroy");
    }
}

/// The push side of a [`cached`](self) queue.
///
/// Holds the shadow of the consumer's read position.
pub struct Producer<T, A: SlotAllocator = Global> {
    shared: Arc<Shared<T, A>>,
    /// `Send` but not `Sync`: one thread drives an endpoint at a time.
    _not_sync: PhantomData<Cell<()>>,

    /// Last observed consumer read position.
    /// Only refreshed when the queue appears full.
    cached_read: usize,
}

impl<T, A: SlotAllocator> Producer<T, A> {
    /// Attempts to push a value into the queue.
    ///
    /// # Errors
    ///
    /// Returns `Err(Full(value))` if the queue is full, giving the value back.
    ///
    /// # Example
    ///
    /// ```
    /// use nexus_spsc::{cached, Full};
    ///
    /// let (mut tx, mut rx) = cached::queue::<u32>(1);
    ///
    /// assert!(tx.push(1).is_ok());
    /// assert_eq!(tx.push(2), Err(Full(2)));
    ///
    /// rx.pop();
    /// assert!(tx.push(2).is_ok());
    /// ```
    #[inline]
    #[must_use = "push returns Err if full, which should be handled"]
    pub fn push(&mut self, value: T) -> Result<(), Full<T>> {
        let shared = &*self.shared;

        let write = shared.write.load(Ordering::Relaxed);
        let next = shared.storage.next(write);

        // Shadow says full; confirm against the real read index.
        if next == self.cached_read {
            return self.push_slow(write, next, value);
        }

        unsafe { shared.storage.write(write, value) };
        shared.write.store(next, Ordering::Release);

        Ok(())
    }

    #[cold]
    fn push_slow(&mut self, write: usize, next: usize, value: T) -> Result<(), Full<T>> {
        let shared = &*self.shared;

        self.cached_read = shared.read.load(Ordering::Acquire);
        if next == self.cached_read {
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
    /// Always loads the real read index; the shadow is not consulted.
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
            .field("cached_read", &self.cached_read)
            .finish_non_exhaustive()
    }
}

/// The pop side of a [`cached`](self) queue.
///
/// Holds the shadow of the producer's write position.
pub struct Consumer<T, A: SlotAllocator = Global> {
    shared: Arc<Shared<T, A>>,
    /// `front(&self)` hands out `&T`, so the consumer must stay on one thread.
    _not_sync: PhantomData<Cell<()>>,

    /// Last observed producer write position.
    /// Only refreshed when the queue appears empty.
    cached_write: usize,
}

impl<T, A: SlotAllocator> Consumer<T, A> {
    /// Attempts to pop the oldest value from the queue.
    ///
    /// Returns `None` if the queue is empty.
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        let read = self.shared.read.load(Ordering::Relaxed);

        if !self.available(read) {
            return None;
        }

        let shared = &*self.shared;
        let value = unsafe { shared.storage.read(read) };
        shared.read.store(shared.storage.next(read), Ordering::Release);

        Some(value)
    }

    /// Removes and drops the oldest value without returning it.
    ///
    /// Returns `false` if the queue is empty.
    #[inline]
    pub fn discard(&mut self) -> bool {
        let read = self.shared.read.load(Ordering::Relaxed);

        if !self.available(read) {
            return false;
        }

        let shared = &*self.shared;
        unsafe { shared.storage.drop_in_place(read) };
        shared.read.store(shared.storage.next(read), Ordering::Release);

        true
    }

    /// Returns `true` if the slot at `read` holds a published value,
    /// refreshing the shadow if it says otherwise.
    #[inline(always)]
    fn available(&mut self, read: usize) -> bool {
        if read != self.cached_write {
            return true;
        }
        self.refresh(read)
    }

    #[cold]
    fn refresh(&mut self, read: usize) -> bool {
        self.cached_write = self.shared.write.load(Ordering::Acquire);
        read != self.cached_write
    }

    /// Borrows the oldest value without removing it.
    ///
    /// Returns `None` if the queue is empty. Takes `&self`, so the shadow is
    /// left alone and the real write index is loaded when the shadow says
    /// empty.
    #[inline]
    pub fn front(&self) -> Option<&T> {
        let shared = &*self.shared;
        let read = shared.read.load(Ordering::Relaxed);

        if read == self.cached_write && read == shared.write.load(Ordering::Acquire) {
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
            .field("cached_write", &self.cached_write)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn basic_push_pop() {
        let (mut tx, mut rx) = queue::<u64>(8);

        tx.push(1).unwrap();
        tx.push(2).unwrap();
        tx.push(3).unwrap();

        assert_eq!(rx.pop(), Some(1));
        assert_eq!(rx.pop(), Some(2));
        assert_eq!(rx.pop(), Some(3));
        assert_eq!(rx.pop(), None);
    }

    #[test]
    fn producer_shadow_refreshes_only_when_full() {
        let (mut tx, mut rx) = queue::<u64>(4);

        // cached_read starts at 0 and the first four pushes never reach it
        for i in 0..4 {
            tx.push(i).unwrap();
            assert_eq!(tx.cached_read, 0);
        }

        // Shadow says full, reload says full
        assert_eq!(tx.push(4), Err(Full(4)));
        assert_eq!(tx.cached_read, 0);

        rx.pop().unwrap();
        rx.pop().unwrap();

        // Shadow still says full; reload sees two free slots
        tx.push(4).unwrap();
        assert_eq!(tx.cached_read, 2);
        tx.push(5).unwrap();
        assert_eq!(tx.push(6), Err(Full(6)));
    }

    #[test]
    fn consumer_shadow_refreshes_only_when_empty() {
        let (mut tx, mut rx) = queue::<u64>(8);

        assert_eq!(rx.pop(), None);
        assert_eq!(rx.cached_write, 0);

        for i in 0..5 {
            tx.push(i).unwrap();
        }

        // One reload covers all five
        assert_eq!(rx.pop(), Some(0));
        assert_eq!(rx.cached_write, 5);

        tx.push(5).unwrap();
        for i in 1..5 {
            assert_eq!(rx.pop(), Some(i));
            assert_eq!(rx.cached_write, 5);
        }

        // Shadow exhausted: reload picks up the late push
        assert_eq!(rx.pop(), Some(5));
        assert_eq!(rx.cached_write, 6);
    }

    #[test]
    fn front_sees_past_stale_shadow() {
        let (mut tx, rx) = queue::<u64>(4);

        tx.push(9).unwrap();
        assert_eq!(rx.cached_write, 0);
        assert_eq!(rx.front(), Some(&9));
    }

    #[test]
    fn discard_uses_shadow() {
        let (mut tx, mut rx) = queue::<String>(2);
        assert!(!rx.discard());

        tx.push("a".into()).unwrap();
        tx.push("b".into()).unwrap();
        assert!(rx.discard());
        assert_eq!(rx.pop().as_deref(), Some("b"));
        assert!(!rx.discard());
    }

    #[test]
    fn wrapping_indices() {
        let (mut tx, mut rx) = queue::<u64>(4);

        for i in 0..1000 {
            tx.push(i).unwrap();
            assert_eq!(rx.pop().unwrap(), i);
        }
    }

    #[test]
    fn with_drop_type() {
        static DROPS: AtomicUsize = AtomicUsize::new(0);

        #[derive(Debug)]
        struct DropCounter;
        impl Drop for DropCounter {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::SeqCst);
            }
        }

        let (mut tx, mut rx) = queue::<DropCounter>(8);

        tx.push(DropCounter).unwrap();
        tx.push(DropCounter).unwrap();
        tx.push(DropCounter).unwrap();

        assert_eq!(DROPS.load(Ordering::SeqCst), 0);

        let _ = rx.pop().unwrap();
        assert_eq!(DROPS.load(Ordering::SeqCst), 1);

        drop(rx);
        drop(tx);

        assert_eq!(DROPS.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn cross_thread_small_capacity() {
        let (mut tx, mut rx) = queue::<u64>(3);

        let handle = thread::spawn(move || {
            for i in 0..200_000u64 {
                while tx.push(i).is_err() {
                    std::hint::spin_loop();
                }
            }
        });

        let mut expected = 0u64;
        while expected < 200_000 {
            if let Some(val) = rx.pop() {
                assert_eq!(val, expected);
                expected += 1;
            }
        }

        handle.join().unwrap();
    }

    #[test]
    fn cross_thread_heap_values() {
        let (mut tx, mut rx) = queue::<Box<u64>>(16);

        let handle = thread::spawn(move || {
            for i in 0..50_000u64 {
                let mut value = Box::new(i);
                loop {
                    match tx.push(value) {
                        Ok(()) => break,
                        Err(Full(v)) => value = v,
                    }
                    std::hint::spin_loop();
                }
            }
        });

        for expected in 0..50_000u64 {
            let value = loop {
                if let Some(v) = rx.pop() {
                    break v;
                }
                std::hint::spin_loop();
            };
            assert_eq!(*value, expected);
        }

        handle.join().unwrap();
    }
}
