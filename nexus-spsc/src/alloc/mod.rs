//! Pluggable allocation strategy for queue storage.
//!
//! A queue asks its allocator for exactly one block at construction and
//! hands it back exactly once when the last endpoint is dropped. Nothing on
//! the push/pop path touches the allocator.
//!
//! - [`Global`] - the process allocator via `std::alloc` (default)
//! - [`MmapAllocator`] - page-granular anonymous mappings, optionally
//!   locked in RAM (unix only)
//!
//! Arena or pool allocators plug in by implementing [`SlotAllocator`].
//! A shared reference to an allocator is itself an allocator, so one arena
//! can back several queues.

#[cfg(unix)]
mod mmap;

use std::alloc::Layout;
use std::ptr::NonNull;

use crate::error::AllocError;

#[cfg(unix)]
pub use mmap::MmapAllocator;

/// Source of raw memory for queue storage.
///
/// # Safety
///
/// Implementations must return blocks that are valid for reads and writes
/// of `layout.size()` bytes, aligned to `layout.align()`, and not aliased by
/// any other live allocation until passed back to `deallocate`.
///
/// Callers never request zero-sized layouts.
pub unsafe trait SlotAllocator {
    /// Allocates a block described by `layout`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if the request cannot be satisfied.
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError>;

    /// Returns a block to the allocator.
    ///
    /// # Safety
    ///
    /// `ptr` must come from a previous `allocate` call on this allocator
    /// with the same `layout`, and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// The global process allocator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Global;

unsafe impl SlotAllocator for Global {
    #[inline]
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        debug_assert!(layout.size() > 0, "zero-sized allocation request");
        let ptr = unsafe { std::alloc::alloc(layout) };
        NonNull::new(ptr).ok_or(AllocError)
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) }
    }
}

unsafe impl<A: SlotAllocator + ?Sized> SlotAllocator for &A {
    #[inline]
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        (**self).allocate(layout)
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { (**self).deallocate(ptr, layout) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_round_trip() {
        let layout = Layout::array::<u64>(16).unwrap();
        let ptr = Global.allocate(layout).unwrap();
        assert_eq!(ptr.as_ptr() as usize % layout.align(), 0);

        unsafe {
            std::ptr::write_bytes(ptr.as_ptr(), 0xAB, layout.size());
            assert_eq!(*ptr.as_ptr().add(layout.size() - 1), 0xAB);
            Global.deallocate(ptr, layout);
        }
    }

    #[test]
    fn reference_delegates() {
        let layout = Layout::new::<[u8; 64]>();
        let alloc = &Global;
        let ptr = alloc.allocate(layout).unwrap();
        unsafe { alloc.deallocate(ptr, layout) };
    }
}
