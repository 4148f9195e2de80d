//! Accelerator awareness: pointer classification and the runtime interface.
//!
//! An I/O caller may hand the subsystem a buffer that lives in accelerator
//! (GPU) memory rather than host memory. Before staging data through a host
//! buffer, the I/O layer asks this module where a pointer resides.
//!
//! # Architecture
//!
//! - [`AcceleratorRuntime`]: trait over the vendor runtime (address
//!   classification, host memory pinning)
//! - [`classify`]: maps a pointer plus per-handle flags to an [`AccelKind`]
//! - [`NullAccelerator`]: runtime stub for CPU-only deployments

mod classify;
mod runtime;

pub use classify::classify;
pub use runtime::{AccelError, AcceleratorRuntime, AddrInfo, NullAccelerator};

#[cfg(test)]
pub(crate) use runtime::MockAccelerator;

/// Device id passed to registration calls that are not tied to a
/// particular accelerator device.
pub const NO_DEVICE_ID: i32 = -1;

/// Flag bit reported by [`AcceleratorRuntime::check_addr`] for unified
/// (CPU/GPU-coherent) allocations.
pub const UNIFIED_MEMORY: u64 = 1 << 0;

/// Where a pointer resides.
///
/// Derived transiently per [`classify`] call; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccelKind {
    /// Ordinary host (CPU) memory.
    Host,
    /// Accelerator device memory.
    Device {
        /// Id of the owning device.
        device: i32,
    },
    /// Unified/managed accelerator memory, kept coherent with the host by
    /// the runtime.
    ManagedDevice {
        /// Id of the owning device.
        device: i32,
    },
}

impl AccelKind {
    /// Returns true for any accelerator-resident kind.
    #[inline]
    pub fn is_device(&self) -> bool {
        !matches!(self, AccelKind::Host)
    }

    /// Returns true only for unified/managed accelerator memory.
    #[inline]
    pub fn is_managed(&self) -> bool {
        matches!(self, AccelKind::ManagedDevice { .. })
    }
}
