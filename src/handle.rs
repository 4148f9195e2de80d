//! Per-handle flags consulted by the staging allocator.

use std::ops::{BitOr, BitOrAssign};

/// Flags attached to an I/O handle that influence staging decisions.
///
/// These are caller-supplied hints. The only flag the allocator itself
/// consults is [`HandleFlags::ASSERT_NO_ACCEL_BUFFERS`], which promises
/// that no buffer passed through the handle lives in accelerator memory.
///
/// # Example
///
/// ```rust
/// use stagebuf::handle::HandleFlags;
///
/// let flags = HandleFlags::NONE | HandleFlags::ASSERT_NO_ACCEL_BUFFERS;
/// assert!(flags.contains(HandleFlags::ASSERT_NO_ACCEL_BUFFERS));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HandleFlags(u32);

impl HandleFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);

    /// The caller asserts that buffers on this handle never reside in
    /// accelerator memory. Classification short-circuits to host memory
    /// without querying the accelerator runtime.
    pub const ASSERT_NO_ACCEL_BUFFERS: Self = Self(1 << 0);

    /// Check whether all bits of `other` are set in `self`.
    #[inline]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if no flags are set.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// The raw bit representation.
    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for HandleFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for HandleFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}
