//! Blocking SPSC queue guarded by a mutex.
//!
//! The correctness baseline. Every operation takes one lock; `push` sleeps
//! while the queue is full and `pop` sleeps while it is empty.
//!
//! Wakeups are symmetric and only issued on the transitions that can
//! release a sleeper:
//!
//! ```text
//! push into an empty queue  ──► notify not_empty (consumer may be waiting)
//! pop from a full queue     ──► notify not_full  (producer may be waiting)
//! ```
//!
//! With one producer and one consumer there is at most one waiter per
//! condition, so `notify_one` is enough.
//!
//! There is no timeout and no cancellation: a `push` on a full queue whose
//! consumer has gone away sleeps forever. Shut down by agreement, e.g. a
//! sentinel value the consumer recognizes.
//!
//! # Example
//!
//! ```
//! use nexus_spsc::blocking;
//! use std::thread;
//!
//! let (mut tx, mut rx) = blocking::queue::<i32>(2);
//!
//! let consumer = thread::spawn(move || {
//!     let mut seen = Vec::new();
//!     loop {
//!         match rx.pop() {
//!             -1 => break seen,
//!             v => seen.push(v),
//!         }
//!     }
//! });
//!
//! for i in 0..100 {
//!     tx.push(i); // sleeps whenever the consumer falls two behind
//! }
//! tx.push(-1);
//!
//! assert_eq!(consumer.join().unwrap(), (0..100).collect::<Vec<_>>());
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, MappedMutexGuard, Mutex, MutexGuard};

use crate::alloc::{Global, SlotAllocator};
use crate::config::Builder;
use crate::error::{Full, QueueError};
use crate::storage::RingStorage;
use crate::trace::trace;
use crate::{Pop, Push};

/// Creates a blocking queue holding at most `capacity` elements.
///
/// # Panics
///
/// Panics if `capacity` is 0 or the storage cannot be allocated.
pub fn queue<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    match Builder::new(capacity).build_blocking() {
        Ok(pair) => pair,
        Err(err) => panic!("blocking::queue: {err}"),
    }
}

pub(crate) fn build<T, A: SlotAllocator>(
    capacity: usize,
    allocator: A,
) -> Result<(Producer<T, A>, Consumer<T, A>), QueueError> {
    let storage = RingStorage::allocate(capacity, 0, allocator)?;

    let shared = Arc::new(Shared {
        ring: Mutex::new(Ring {
            storage,
            write: 0,
            read: 0,
        }),
        not_empty: Condvar::new(),
        not_full: Condvar::new(),
        capacity,
    });

    Ok((
        Producer {
            shared: Arc::clone(&shared),
        },
        Consumer { shared },
    ))
}

struct Shared<T, A: SlotAllocator> {
    ring: Mutex<Ring<T, A>>,
    not_empty: Condvar,
    not_full: Condvar,
    /// Fixed at construction, readable without the lock.
    capacity: usize,
}

/// Ring state; only ever touched with the lock held.
struct Ring<T, A: SlotAllocator> {
    storage: RingStorage<T, A>,
    write: usize,
    read: usize,
}

impl<T, A: SlotAllocator> Ring<T, A> {
    #[inline]
    fn is_empty(&self) -> bool {
        self.write == self.read
    }

    #[inline]
    fn is_full(&self) -> bool {
        self.storage.next(self.write) == self.read
    }

    #[inline]
    fn len(&self) -> usize {
        self.storage.occupied(self.write, self.read)
    }

    /// Caller checked `!is_full()`.
    #[inline]
    fn push(&mut self, value: T) {
        debug_assert!(!self.is_full());
        unsafe { self.storage.write(self.write, value) };
        self.write = self.storage.next(self.write);
    }

    /// Caller checked `!is_empty()`.
    #[inline]
    fn pop(&mut self) -> T {
        debug_assert!(!self.is_empty());
        let value = unsafe { self.storage.read(self.read) };
        self.read = self.storage.next(self.read);
        value
    }

    fn front_mut(&mut self) -> Option<&mut T> {
        if self.is_empty() {
            return None;
        }
        Some(unsafe { self.storage.get_mut(self.read) })
    }
}

impl<T, A: SlotAllocator> Drop for Ring<T, A> {
    // `dropped` only feeds the trace event.
    #[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
    fn drop(&mut self) {
        let dropped = unsafe { self.storage.drain(self.read, self.write) };
        trace!(dropped, "blocking queue drained on destroy");
    }
}

/// The push side of a [`blocking`](self) queue.
pub struct Producer<T, A: SlotAllocator = Global> {
    shared: Arc<Shared<T, A>>,
}

impl<T, A: SlotAllocator> Producer<T, A> {
    /// Pushes a value, sleeping while the queue is full.
    pub fn push(&mut self, value: T) {
        let shared = &*self.shared;
        let mut ring = shared.ring.lock();

        while ring.is_full() {
            shared.not_full.wait(&mut ring);
        }

        let was_empty = ring.is_empty();
        ring.push(value);
        drop(ring);

        if was_empty {
            shared.not_empty.notify_one();
        }
    }

    /// Attempts to push a value without sleeping.
    ///
    /// # Errors
    ///
    /// Returns `Err(Full(value))` if the queue is full.
    pub fn try_push(&mut self, value: T) -> Result<(), Full<T>> {
        let shared = &*self.shared;
        let mut ring = shared.ring.lock();

        if ring.is_full() {
            return Err(Full(value));
        }

        let was_empty = ring.is_empty();
        ring.push(value);
        drop(ring);

        if was_empty {
            shared.not_empty.notify_one();
        }
        Ok(())
    }

    /// Returns the number of elements the queue can hold.
    ///
    /// Unlike [`len`](Self::len) and [`is_empty`](Self::is_empty) this does
    /// not take the lock. Capacity is fixed at construction and kept outside
    /// the mutex, so the result is the same as a locked read.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Returns the number of elements currently in the queue.
    ///
    /// Takes the lock. The value may be stale as soon as it is returned.
    pub fn len(&self) -> usize {
        self.shared.ring.lock().len()
    }

    /// Returns `true` if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.shared.ring.lock().is_empty()
    }

    /// Returns `true` if the consumer has been dropped.
    #[inline]
    pub fn is_disconnected(&self) -> bool {
        Arc::strong_count(&self.shared) == 1
    }
}

impl<T, A: SlotAllocator> Push<T> for Producer<T, A> {
    fn try_push(&mut self, value: T) -> Result<(), Full<T>> {
        Self::try_push(self, value)
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
            .field("disconnected", &self.is_disconnected())
            .finish_non_exhaustive()
    }
}

/// The pop side of a [`blocking`](self) queue.
pub struct Consumer<T, A: SlotAllocator = Global> {
    shared: Arc<Shared<T, A>>,
}

impl<T, A: SlotAllocator> Consumer<T, A> {
    /// Pops the oldest value, sleeping while the queue is empty.
    pub fn pop(&mut self) -> T {
        let shared = &*self.shared;
        let mut ring = shared.ring.lock();

        while ring.is_empty() {
            shared.not_empty.wait(&mut ring);
        }

        let was_full = ring.is_full();
        let value = ring.pop();
        drop(ring);

        if was_full {
            shared.not_full.notify_one();
        }
        value
    }

    /// Attempts to pop the oldest value without sleeping.
    ///
    /// Returns `None` if the queue is empty.
    pub fn try_pop(&mut self) -> Option<T> {
        let shared = &*self.shared;
        let mut ring = shared.ring.lock();

        if ring.is_empty() {
            return None;
        }

        let was_full = ring.is_full();
        let value = ring.pop();
        drop(ring);

        if was_full {
            shared.not_full.notify_one();
        }
        Some(value)
    }

    /// Removes and drops the oldest value without returning it.
    ///
    /// Returns `false` if the queue is empty. The value is dropped after the
    /// lock is released.
    pub fn discard(&mut self) -> bool {
        self.try_pop().is_some()
    }

    /// Locks the queue and borrows the oldest value.
    ///
    /// Returns `None` if the queue is empty. The producer is blocked for as
    /// long as the returned guard is alive.
    ///
    /// ```
    /// use nexus_spsc::blocking;
    ///
    /// let (mut tx, rx) = blocking::queue::<String>(4);
    /// assert!(rx.front().is_none());
    ///
    /// tx.push("hello".to_string());
    /// assert_eq!(rx.front().as_deref().map(String::as_str), Some("hello"));
    /// ```
    pub fn front(&self) -> Option<MappedMutexGuard<'_, T>> {
        MutexGuard::try_map(self.shared.ring.lock(), Ring::front_mut).ok()
    }

    /// Returns the number of elements the queue can hold.
    ///
    /// Unlike [`len`](Self::len) and [`is_empty`](Self::is_empty) this does
    /// not take the lock. Capacity is fixed at construction and kept outside
    /// the mutex, so the result is the same as a locked read.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Returns the number of elements currently in the queue.
    ///
    /// Takes the lock. The value may be stale as soon as it is returned.
    pub fn len(&self) -> usize {
        self.shared.ring.lock().len()
    }

    /// Returns `true` if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.shared.ring.lock().is_empty()
    }

    /// Returns `true` if the producer has been dropped.
    #[inline]
    pub fn is_disconnected(&self) -> bool {
        Arc::strong_count(&self.shared) == 1
    }
}

impl<T, A: SlotAllocator> Pop<T> for Consumer<T, A> {
    fn try_pop(&mut self) -> Option<T> {
        Self::try_pop(self)
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
            .field("disconnected", &self.is_disconnected())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn try_ops_respect_capacity() {
        let (mut tx, mut rx) = queue::<i32>(2);

        assert!(tx.try_push(1).is_ok());
        assert_eq!(tx.len(), 1);
        assert!(tx.try_push(2).is_ok());
        assert_eq!(tx.len(), 2);
        assert_eq!(tx.try_push(3), Err(Full(3)));

        assert_eq!(rx.try_pop(), Some(1));
        assert_eq!(rx.try_pop(), Some(2));
        assert_eq!(rx.try_pop(), None);
        assert!(rx.is_empty());
    }

    #[test]
    fn push_blocks_until_pop() {
        let (mut tx, mut rx) = queue::<u32>(1);
        let pushed = Arc::new(AtomicBool::new(false));
        let pushed_clone = Arc::clone(&pushed);

        tx.push(1);

        let handle = thread::spawn(move || {
            tx.push(2);
            pushed_clone.store(true, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!pushed.load(Ordering::SeqCst), "push must wait for space");

        assert_eq!(rx.pop(), 1);
        handle.join().unwrap();
        assert!(pushed.load(Ordering::SeqCst));
        assert_eq!(rx.pop(), 2);
    }

    #[test]
    fn pop_blocks_until_push() {
        let (mut tx, mut rx) = queue::<u32>(4);

        let handle = thread::spawn(move || rx.pop());

        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished(), "pop must wait for data");

        tx.push(7);
        assert_eq!(handle.join().unwrap(), 7);
    }

    #[test]
    fn front_holds_lock_view() {
        let (mut tx, mut rx) = queue::<Vec<u8>>(2);
        tx.push(vec![1, 2]);

        if let Some(mut front) = rx.front() {
            front.push(3);
        }
        assert_eq!(rx.pop(), vec![1, 2, 3]);
        assert!(rx.front().is_none());
    }

    #[test]
    fn discard_drops_oldest() {
        let (mut tx, mut rx) = queue::<String>(2);
        assert!(!rx.discard());
        tx.push("a".into());
        tx.push("b".into());
        assert!(rx.discard());
        assert_eq!(rx.pop(), "b");
    }

    #[test]
    fn capacity_is_lock_free_constant() {
        let (tx, rx) = queue::<u8>(5);
        let _guard = tx.shared.ring.lock();
        assert_eq!(tx.capacity(), 5);
        assert_eq!(rx.capacity(), 5);
    }

    #[test]
    fn cross_thread_ping_pong_full() {
        let (mut tx, mut rx) = queue::<u64>(1);

        let handle = thread::spawn(move || {
            for i in 0..10_000u64 {
                tx.push(i);
            }
        });

        for expected in 0..10_000u64 {
            assert_eq!(rx.pop(), expected);
        }
        handle.join().unwrap();
    }
}
