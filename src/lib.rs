//! # stagebuf
//!
//! An accelerator-aware staging buffer allocator for file I/O.
//!
//! When an I/O subsystem moves data between application memory and
//! storage it often needs intermediate host buffers: the application
//! buffer may live in GPU memory, or the transfer may be reshaped into
//! page-sized chunks. stagebuf provides those staging buffers and the
//! classification logic deciding when they are needed.
//!
//! ## Features
//!
//! - **Pointer classification**: host vs. device vs. unified/managed
//!   memory, with a per-handle bypass for known-host workloads
//! - **Page-granular segments**: allocations round up to whole pages and
//!   are host-registered with the accelerator runtime for direct DMA
//! - **Shared lifecycle**: one lazily constructed allocator per process,
//!   exactly-once construction under concurrency, re-entrant teardown
//! - **Pluggable strategy**: buffer carving/recycling sits behind a
//!   narrow contract selected by identifier
//!
//! ## Quick Start
//!
//! ```rust
//! use stagebuf::prelude::*;
//!
//! let staging = StagingAllocator::cpu_only();
//!
//! // Does the caller's buffer need staging at all?
//! let data = [0u8; 16];
//! let kind = staging.classify(HandleFlags::NONE, data.as_ptr());
//! assert_eq!(kind, AccelKind::Host);
//!
//! // Obtain and return a staging buffer.
//! let buf = staging.allocate(HandleFlags::NONE, 64 * 1024)?;
//! staging.release(HandleFlags::NONE, buf.as_ptr());
//!
//! staging.finalize()?;
//! # Ok::<(), stagebuf::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod accel;
pub mod allocator;
pub mod error;
pub mod handle;
pub mod observability;
pub mod segment;
pub mod strategy;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::accel::{AccelKind, AcceleratorRuntime, NullAccelerator};
    pub use crate::allocator::StagingAllocator;
    pub use crate::error::{Error, Result};
    pub use crate::handle::HandleFlags;
}

pub use error::{Error, Result};
