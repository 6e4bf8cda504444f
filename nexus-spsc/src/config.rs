//! Queue configuration: cache line size, padding and the construction
//! builder.

use crate::alloc::{Global, SlotAllocator};
use crate::error::QueueError;
use crate::{basic, blocking, cached, padded};

/// Assumed hardware cache line size in bytes.
///
/// 128 on targets known to use 128-byte lines (Apple aarch64, powerpc64),
/// 64 everywhere else. This only drives storage padding; override it per
/// queue with [`Builder::cache_line`] when the target is known to differ.
#[cfg(any(
    all(target_arch = "aarch64", target_vendor = "apple"),
    target_arch = "powerpc64"
))]
pub const CACHE_LINE_SIZE: usize = 128;

/// Assumed hardware cache line size in bytes.
///
/// 128 on targets known to use 128-byte lines (Apple aarch64, powerpc64),
/// 64 everywhere else. This only drives storage padding; override it per
/// queue with [`Builder::cache_line`] when the target is known to differ.
#[cfg(not(any(
    all(target_arch = "aarch64", target_vendor = "apple"),
    target_arch = "powerpc64"
)))]
pub const CACHE_LINE_SIZE: usize = 64;

/// Number of `T` slots that cover at least one cache line.
///
/// Padded variants reserve this many unused slots on each side of the ring
/// so the first and last live elements never share a line with anything
/// else. Zero-sized types need no padding.
///
/// ```
/// use nexus_spsc::padding_slots;
///
/// assert_eq!(padding_slots::<u64>(64), 8);
/// assert_eq!(padding_slots::<[u8; 48]>(64), 2);
/// assert_eq!(padding_slots::<[u8; 256]>(64), 1);
/// assert_eq!(padding_slots::<()>(64), 0);
/// ```
#[must_use]
pub const fn padding_slots<T>(cache_line: usize) -> usize {
    let size = size_of::<T>();
    if size == 0 { 0 } else { cache_line.div_ceil(size) }
}

/// Builder for every queue variant.
///
/// The free `queue` functions in each variant module panic on bad input;
/// the builder reports it instead.
///
/// # Example
///
/// ```
/// use nexus_spsc::{Builder, QueueError};
///
/// let (mut tx, mut rx) = Builder::new(256)
///     .cache_line(128)
///     .build_padded::<u64>()?;
///
/// tx.push(5).unwrap();
/// assert_eq!(rx.pop(), Some(5));
///
/// assert_eq!(
///     Builder::new(0).build_basic::<u64>().err(),
///     Some(QueueError::ZeroCapacity)
/// );
/// # Ok::<(), QueueError>(())
/// ```
#[derive(Clone, Debug)]
pub struct Builder<A = Global> {
    capacity: usize,
    cache_line: usize,
    allocator: A,
}

impl Builder<Global> {
    /// Starts a queue holding at most `capacity` elements, backed by the
    /// global allocator.
    #[must_use]
    pub const fn new(capacity: usize) -> Self {
        Self {
            capacity,
            cache_line: CACHE_LINE_SIZE,
            allocator: Global,
        }
    }
}

impl<A: SlotAllocator> Builder<A> {
    /// Cache line size used to compute storage padding. Default:
    /// [`CACHE_LINE_SIZE`].
    ///
    /// Must be a non-zero power of two for [`build_padded`](Self::build_padded)
    /// and [`build_cached`](Self::build_cached). Ignored, and not validated,
    /// by the variants without storage padding.
    #[must_use]
    pub fn cache_line(mut self, bytes: usize) -> Self {
        self.cache_line = bytes;
        self
    }

    /// Allocator for the storage block.
    pub fn allocator<B: SlotAllocator>(self, allocator: B) -> Builder<B> {
        Builder {
            capacity: self.capacity,
            cache_line: self.cache_line,
            allocator,
        }
    }

    /// Requested capacity.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    const fn validate(&self) -> Result<(), QueueError> {
        if self.capacity == 0 {
            return Err(QueueError::ZeroCapacity);
        }
        Ok(())
    }

    /// Padded variants also need a usable cache line size.
    const fn validate_padded(&self) -> Result<usize, QueueError> {
        if self.capacity == 0 {
            return Err(QueueError::ZeroCapacity);
        }
        if !self.cache_line.is_power_of_two() {
            return Err(QueueError::InvalidCacheLine(self.cache_line));
        }
        Ok(self.cache_line)
    }

    /// Builds a [`blocking`] queue.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the capacity is zero or the storage could
    /// not be allocated. The cache line size is not checked.
    pub fn build_blocking<T>(
        self,
    ) -> Result<(blocking::Producer<T, A>, blocking::Consumer<T, A>), QueueError> {
        self.validate()?;
        blocking::build(self.capacity, self.allocator)
    }

    /// Builds a [`basic`] lock-free queue.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the capacity is zero or the storage could
    /// not be allocated. The cache line size is not checked.
    pub fn build_basic<T>(self) -> Result<(basic::Producer<T, A>, basic::Consumer<T, A>), QueueError> {
        self.validate()?;
        basic::build(self.capacity, self.allocator)
    }

    /// Builds a [`padded`] lock-free queue.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the capacity or cache line size is invalid
    /// or the storage could not be allocated.
    pub fn build_padded<T>(
        self,
    ) -> Result<(padded::Producer<T, A>, padded::Consumer<T, A>), QueueError> {
        let cache_line = self.validate_padded()?;
        padded::build(self.capacity, padding_slots::<T>(cache_line), self.allocator)
    }

    /// Builds a [`cached`] lock-free queue.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the capacity or cache line size is invalid
    /// or the storage could not be allocated.
    pub fn build_cached<T>(
        self,
    ) -> Result<(cached::Producer<T, A>, cached::Consumer<T, A>), QueueError> {
        let cache_line = self.validate_padded()?;
        cached::build(self.capacity, padding_slots::<T>(cache_line), self.allocator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cache_line_is_power_of_two() {
        assert!(CACHE_LINE_SIZE.is_power_of_two());
        assert!(CACHE_LINE_SIZE >= 64);
    }

    #[test]
    fn padding_covers_a_line() {
        assert_eq!(padding_slots::<u8>(64), 64);
        assert_eq!(padding_slots::<u64>(128), 16);
        assert_eq!(padding_slots::<[u8; 65]>(64), 1);
        assert_eq!(padding_slots::<[u8; 24]>(64), 3);
    }

    #[test]
    fn rejects_bad_cache_line() {
        assert_eq!(
            Builder::new(8).cache_line(0).build_padded::<u64>().err(),
            Some(QueueError::InvalidCacheLine(0))
        );
        assert_eq!(
            Builder::new(8).cache_line(96).build_cached::<u64>().err(),
            Some(QueueError::InvalidCacheLine(96))
        );
    }

    #[test]
    fn unpadded_variants_ignore_cache_line() {
        let (mut tx, mut rx) = Builder::new(4).cache_line(96).build_basic::<u64>().unwrap();
        tx.push(1).unwrap();
        assert_eq!(rx.pop(), Some(1));

        let (mut tx, mut rx) = Builder::new(4).cache_line(0).build_blocking::<u64>().unwrap();
        tx.push(2);
        assert_eq!(rx.pop(), 2);
    }

    #[test]
    fn rejects_zero_capacity_for_every_variant() {
        assert_eq!(
            Builder::new(0).build_blocking::<u64>().err(),
            Some(QueueError::ZeroCapacity)
        );
        assert_eq!(
            Builder::new(0).build_basic::<u64>().err(),
            Some(QueueError::ZeroCapacity)
        );
        assert_eq!(
            Builder::new(0).build_padded::<u64>().err(),
            Some(QueueError::ZeroCapacity)
        );
        assert_eq!(
            Builder::new(0).build_cached::<u64>().err(),
            Some(QueueError::ZeroCapacity)
        );
    }

    #[test]
    fn capacity_is_exact() {
        let (tx, _rx) = Builder::new(100).build_padded::<u64>().unwrap();
        assert_eq!(tx.capacity(), 100);
        let (tx, _rx) = Builder::new(1).build_blocking::<u64>().unwrap();
        assert_eq!(tx.capacity(), 1);
    }
}
