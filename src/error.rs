//! Error types for stagebuf.

use thiserror::Error;

/// Result type alias using stagebuf's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for stagebuf operations.
#[derive(Error, Debug)]
pub enum Error {
    /// No allocator strategy with the requested identifier is available.
    #[error("no allocator strategy named {0:?} is available")]
    StrategyUnavailable(String),

    /// A strategy was found but could not be constructed.
    #[error("allocator strategy construction failed: {0}")]
    ConstructionFailed(String),

    /// Raw segment allocation failed.
    ///
    /// Carries the rounded mapping size and the errno from the failed
    /// mapping. An unrepresentably large request reports `ENOMEM` with
    /// the size as requested.
    #[error("segment allocation of {len} bytes failed: {errno}")]
    SegmentAllocationFailed {
        /// Requested mapping size in bytes.
        len: usize,
        /// Errno from the failed mapping.
        errno: rustix::io::Errno,
    },
}
