//! Error types for queue construction and the push path.

use std::fmt;

/// Error returned when pushing into a full queue.
///
/// Contains the value that could not be pushed, allowing recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Full<T>(
    /// The value that could not be pushed.
    pub T,
);

impl<T> Full<T> {
    /// Returns the value that could not be pushed.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Display for Full<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue is full")
    }
}

impl<T: fmt::Debug> std::error::Error for Full<T> {}

/// The allocator could not satisfy a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocError;

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "memory allocation failed")
    }
}

impl std::error::Error for AllocError {}

/// Error during queue construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// Capacity is zero.
    ZeroCapacity,
    /// Capacity plus reserved slots does not fit in a memory layout.
    CapacityOverflow,
    /// Cache line size is zero or not a power of two.
    InvalidCacheLine(usize),
    /// The allocator refused the storage request.
    AllocationFailed {
        /// Size of the refused request.
        bytes: usize,
    },
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroCapacity => write!(f, "capacity cannot be zero"),
            Self::CapacityOverflow => write!(f, "capacity overflows the storage layout"),
            Self::InvalidCacheLine(bytes) => {
                write!(f, "cache line size ({bytes}) must be a non-zero power of two")
            }
            Self::AllocationFailed { bytes } => {
                write!(f, "failed to allocate {bytes} bytes of queue storage")
            }
        }
    }
}

impl std::error::Error for QueueError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_returns_value() {
        let err = Full(String::from("payload"));
        assert_eq!(err.to_string(), "queue is full");
        assert_eq!(err.into_inner(), "payload");
    }

    #[test]
    fn queue_error_messages() {
        assert_eq!(
            QueueError::ZeroCapacity.to_string(),
            "capacity cannot be zero"
        );
        assert_eq!(
            QueueError::InvalidCacheLine(48).to_string(),
            "cache line size (48) must be a non-zero power of two"
        );
        assert_eq!(
            QueueError::AllocationFailed { bytes: 4096 }.to_string(),
            "failed to allocate 4096 bytes of queue storage"
        );
    }
}
