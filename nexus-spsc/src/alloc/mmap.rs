//! Anonymous-mapping allocator (unix).

use std::alloc::Layout;
use std::ptr::{self, NonNull};
use std::sync::OnceLock;

use super::SlotAllocator;
use crate::error::AllocError;

fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        usize::try_from(size).ok().filter(|&s| s > 0).unwrap_or(4096)
    })
}

#[inline]
fn round_to_pages(size: usize) -> Option<usize> {
    let page = page_size();
    size.checked_add(page - 1).map(|s| s & !(page - 1))
}

/// Allocates queue storage directly from the OS with `mmap`.
///
/// Every block is page aligned and rounded up to whole pages, so the
/// storage never shares a page (let alone a cache line) with unrelated heap
/// data. With [`mlock`](Self::mlock) the pages are also pinned in RAM so the
/// hot path cannot page-fault on swapped-out slots.
///
/// # Example
///
/// ```
/// use nexus_spsc::{Builder, MmapAllocator};
///
/// let (mut tx, mut rx) = Builder::new(4096)
///     .allocator(MmapAllocator::new())
///     .build_cached::<u64>()
///     .unwrap();
///
/// tx.push(1).unwrap();
/// assert_eq!(rx.pop(), Some(1));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MmapAllocator {
    mlock: bool,
}

impl MmapAllocator {
    /// Creates an allocator that maps fresh anonymous pages.
    pub const fn new() -> Self {
        Self { mlock: false }
    }

    /// Lock mapped pages in physical RAM.
    ///
    /// Allocation fails if the lock cannot be taken (usually
    /// `RLIMIT_MEMLOCK` is too low).
    #[must_use]
    pub const fn mlock(mut self, enabled: bool) -> Self {
        self.mlock = enabled;
        self
    }
}

unsafe impl SlotAllocator for MmapAllocator {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        if layout.align() > page_size() {
            return Err(AllocError);
        }
        let size = round_to_pages(layout.size()).ok_or(AllocError)?;

        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(AllocError);
        }

        if self.mlock && unsafe { libc::mlock(ptr, size) } != 0 {
            unsafe { libc::munmap(ptr, size) };
            return Err(AllocError);
        }

        NonNull::new(ptr.cast::<u8>()).ok_or(AllocError)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // Same rounding as allocate; the layout fit at allocation time.
        let size = round_to_pages(layout.size()).unwrap_or(layout.size());
        unsafe {
            libc::munmap(ptr.as_ptr().cast(), size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_is_page_aligned() {
        let layout = Layout::from_size_align(100, 8).unwrap();
        let alloc = MmapAllocator::new();
        let ptr = alloc.allocate(layout).unwrap();
        assert_eq!(ptr.as_ptr() as usize % page_size(), 0);
        unsafe { alloc.deallocate(ptr, layout) };
    }

    #[test]
    fn can_write_entire_region() {
        let size = page_size() * 4;
        let layout = Layout::from_size_align(size, 64).unwrap();
        let alloc = MmapAllocator::new();
        let ptr = alloc.allocate(layout).unwrap();
        unsafe {
            ptr::write_bytes(ptr.as_ptr(), 0xAB, size);
            assert_eq!(*ptr.as_ptr(), 0xAB);
            assert_eq!(*ptr.as_ptr().add(size - 1), 0xAB);
            alloc.deallocate(ptr, layout);
        }
    }

    #[test]
    fn over_aligned_request_is_refused() {
        let layout = Layout::from_size_align(64, page_size() * 2).unwrap();
        assert_eq!(MmapAllocator::new().allocate(layout), Err(AllocError));
    }

    #[test]
    fn mlock_returns_result() {
        let layout = Layout::from_size_align(4096, 64).unwrap();
        let alloc = MmapAllocator::new().mlock(true);
        if let Ok(ptr) = alloc.allocate(layout) {
            unsafe { alloc.deallocate(ptr, layout) };
        }
    }

    #[test]
    fn rounding() {
        let page = page_size();
        assert_eq!(round_to_pages(1), Some(page));
        assert_eq!(round_to_pages(page), Some(page));
        assert_eq!(round_to_pages(page + 1), Some(page * 2));
        assert_eq!(round_to_pages(usize::MAX), None);
    }
}
