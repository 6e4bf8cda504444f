//! Fixed-capacity slot storage shared by every queue variant.
//!
//! One contiguous block holds `padding + len + padding` slots:
//!
//! ```text
//! ┌──────────────┬──────────────────────────────────┬──────────────┐
//! │ padding      │ ring: [T; capacity + 1]          │ padding      │
//! │ (never used) │ logical index 0 ..= capacity     │ (never used) │
//! └──────────────┴──────────────────────────────────┴──────────────┘
//! ```
//!
//! The ring reserves one slot to tell full from empty with two indices:
//! - empty: `write == read`
//! - full:  `next(write) == read`
//!
//! Storage owns memory, not values. Which slots hold live values is decided
//! by the indices of the queue that owns the storage; that queue must drain
//! them before the storage is dropped.

use std::alloc::Layout;
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::alloc::{Global, SlotAllocator};
use crate::error::QueueError;
use crate::trace::{debug, warn};

pub(crate) struct RingStorage<T, A: SlotAllocator = Global> {
    base: NonNull<T>,
    /// Ring length, `capacity + 1`.
    len: usize,
    /// Unused slots on each side of the ring.
    padding: usize,
    layout: Layout,
    allocator: A,
    _marker: PhantomData<T>,
}

// Safety: slots are only reached through unsafe methods whose callers
// uphold the single-writer/single-reader protocol of the owning queue.
unsafe impl<T: Send, A: SlotAllocator + Send> Send for RingStorage<T, A> {}
unsafe impl<T: Send, A: SlotAllocator + Sync> Sync for RingStorage<T, A> {}

impl<T, A: SlotAllocator> RingStorage<T, A> {
    /// Allocates storage for `capacity` elements plus the disambiguation
    /// slot, surrounded by `padding` unused slots on each side.
    pub(crate) fn allocate(capacity: usize, padding: usize, allocator: A) -> Result<Self, QueueError> {
        if capacity == 0 {
            return Err(QueueError::ZeroCapacity);
        }

        let len = capacity.checked_add(1).ok_or(QueueError::CapacityOverflow)?;
        let total = padding
            .checked_mul(2)
            .and_then(|p| p.checked_add(len))
            .ok_or(QueueError::CapacityOverflow)?;
        let layout = Layout::array::<T>(total).map_err(|_| QueueError::CapacityOverflow)?;

        let base = if layout.size() == 0 {
            NonNull::dangling()
        } else {
            match allocator.allocate(layout) {
                Ok(ptr) => ptr.cast::<T>(),
                Err(_) => {
                    warn!(bytes = layout.size(), capacity, "queue storage allocation failed");
                    return Err(QueueError::AllocationFailed {
                        bytes: layout.size(),
                    });
                }
            }
        };

        debug!(
            capacity,
            padding,
            bytes = layout.size(),
            element = std::any::type_name::<T>(),
            "allocated queue storage"
        );

        Ok(Self {
            base,
            len,
            padding,
            layout,
            allocator,
            _marker: PhantomData,
        })
    }

    /// Number of usable slots.
    #[inline]
    pub(crate) const fn capacity(&self) -> usize {
        self.len - 1
    }

    /// Unused slots on each side of the ring.
    #[inline]
    pub(crate) const fn padding(&self) -> usize {
        self.padding
    }

    /// Returns the index following `index`, wrapping at the ring length.
    #[inline(always)]
    pub(crate) const fn next(&self, index: usize) -> usize {
        let next = index + 1;
        if next == self.len { 0 } else { next }
    }

    /// Number of occupied slots between `read` and `write`.
    #[inline]
    pub(crate) const fn occupied(&self, write: usize, read: usize) -> usize {
        if write >= read {
            write - read
        } else {
            write + self.len - read
        }
    }

    /// Address of the slot for a logical ring position, past the leading
    /// padding.
    #[inline(always)]
    pub(crate) fn slot_at(&self, index: usize) -> *mut T {
        debug_assert!(index < self.len, "ring index {index} out of bounds");
        unsafe { self.base.as_ptr().add(self.padding + index) }
    }

    /// Moves `value` into the slot at `index`.
    ///
    /// # Safety
    ///
    /// The slot must be vacant and exclusively owned by the caller.
    #[inline(always)]
    pub(crate) unsafe fn write(&self, index: usize, value: T) {
        unsafe { self.slot_at(index).write(value) }
    }

    /// Moves the value out of the slot at `index`, leaving it vacant.
    ///
    /// # Safety
    ///
    /// The slot must hold a live value exclusively owned by the caller.
    #[inline(always)]
    pub(crate) unsafe fn read(&self, index: usize) -> T {
        unsafe { self.slot_at(index).read() }
    }

    /// Borrows the value in the slot at `index`.
    ///
    /// # Safety
    ///
    /// The slot must hold a live value that is not moved out or dropped
    /// while the borrow lasts.
    #[inline(always)]
    pub(crate) unsafe fn get(&self, index: usize) -> &T {
        unsafe { &*self.slot_at(index) }
    }

    /// Mutably borrows the value in the slot at `index`.
    ///
    /// # Safety
    ///
    /// As for [`get`](Self::get), and no other borrow of the slot may exist.
    #[inline(always)]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn get_mut(&self, index: usize) -> &mut T {
        unsafe { &mut *self.slot_at(index) }
    }

    /// Drops the value in the slot at `index`, leaving it vacant.
    ///
    /// # Safety
    ///
    /// The slot must hold a live value exclusively owned by the caller.
    #[inline]
    pub(crate) unsafe fn drop_in_place(&self, index: usize) {
        unsafe { self.slot_at(index).drop_in_place() }
    }

    /// Drops every value in `[read, write)`, oldest first.
    ///
    /// Returns the number of values dropped.
    ///
    /// # Safety
    ///
    /// Must only be called by the sole remaining owner, with the final
    /// values of both indices.
    pub(crate) unsafe fn drain(&self, mut read: usize, write: usize) -> usize {
        let mut dropped = 0;
        while read != write {
            unsafe { self.drop_in_place(read) };
            read = self.next(read);
            dropped += 1;
        }
        dropped
    }
}

impl<T, A: SlotAllocator> Drop for RingStorage<T, A> {
    fn drop(&mut self) {
        if self.layout.size() != 0 {
            // Safety: allocated in `allocate` with this exact layout
            unsafe { self.allocator.deallocate(self.base.cast(), self.layout) };
        }
    }
}
