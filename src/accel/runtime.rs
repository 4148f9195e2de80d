//! Accelerator runtime interface.

use thiserror::Error;

/// Error from an accelerator runtime call.
///
/// Callers in this crate always absorb these: a failing runtime degrades
/// to "host memory" on classification and to best-effort cleanup on
/// unregistration. The error never propagates past the call site.
#[derive(Debug, Error)]
#[error("accelerator runtime: {0}")]
pub struct AccelError(
    /// Human-readable failure description from the runtime.
    pub String,
);

/// Residency report for a pointer, as returned by
/// [`AcceleratorRuntime::check_addr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddrInfo {
    /// Id of the device owning the allocation.
    pub device: i32,
    /// Runtime-specific flag bits, e.g. [`UNIFIED_MEMORY`].
    ///
    /// [`UNIFIED_MEMORY`]: crate::accel::UNIFIED_MEMORY
    pub flags: u64,
}

/// Interface to the accelerator (GPU) runtime.
///
/// Implementations wrap a vendor runtime (CUDA, ROCm, ...). The crate
/// calls three things: address classification, host memory registration
/// so the device can DMA into pageable memory, and the matching
/// unregistration.
///
/// All failures from this interface are treated as soft by callers.
/// A deployment without any accelerator should use [`NullAccelerator`].
pub trait AcceleratorRuntime: Send + Sync {
    /// Report whether `ptr` belongs to an accelerator allocation.
    ///
    /// Returns `None` both when the pointer is plain host memory and when
    /// the query itself fails; the two are deliberately indistinguishable.
    fn check_addr(&self, ptr: *const u8) -> Option<AddrInfo>;

    /// Register a host memory range as DMA-visible to `device`.
    fn host_register(
        &self,
        device: i32,
        ptr: *const u8,
        len: usize,
    ) -> Result<(), AccelError>;

    /// Undo a previous [`host_register`](Self::host_register) for `ptr`.
    fn host_unregister(&self, device: i32, ptr: *const u8) -> Result<(), AccelError>;
}

/// Runtime stub for CPU-only deployments.
///
/// Reports every pointer as host memory and accepts register/unregister
/// calls as no-ops, so the allocator behaves identically with or without
/// an accelerator present.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAccelerator;

impl AcceleratorRuntime for NullAccelerator {
    fn check_addr(&self, _ptr: *const u8) -> Option<AddrInfo> {
        None
    }

    fn host_register(
        &self,
        _device: i32,
        _ptr: *const u8,
        _len: usize,
    ) -> Result<(), AccelError> {
        Ok(())
    }

    fn host_unregister(&self, _device: i32, _ptr: *const u8) -> Result<(), AccelError> {
        Ok(())
    }
}

/// Recording runtime double for unit tests.
///
/// Tracks every `check_addr` invocation and all registered ranges so tests
/// can assert the classifier bypass and register/unregister pairing.
#[cfg(test)]
pub(crate) struct MockAccelerator {
    /// Pointers the mock reports as device-resident.
    pub resident: std::sync::Mutex<std::collections::HashMap<usize, AddrInfo>>,
    /// Number of `check_addr` calls observed.
    pub check_addr_calls: std::sync::atomic::AtomicUsize,
    /// Currently registered ranges (addr -> len).
    pub registered: std::sync::Mutex<std::collections::HashMap<usize, usize>>,
    /// Addresses passed to `host_unregister`, in order.
    pub unregistered: std::sync::Mutex<Vec<usize>>,
    /// When true, register/unregister calls fail.
    pub fail_registration: bool,
}

#[cfg(test)]
impl MockAccelerator {
    pub fn new() -> Self {
        Self {
            resident: std::sync::Mutex::new(std::collections::HashMap::new()),
            check_addr_calls: std::sync::atomic::AtomicUsize::new(0),
            registered: std::sync::Mutex::new(std::collections::HashMap::new()),
            unregistered: std::sync::Mutex::new(Vec::new()),
            fail_registration: false,
        }
    }

    pub fn with_resident(ptr: *const u8, info: AddrInfo) -> Self {
        let mock = Self::new();
        mock.resident.lock().unwrap().insert(ptr as usize, info);
        mock
    }

    pub fn check_addr_count(&self) -> usize {
        self.check_addr_calls
            .load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl AcceleratorRuntime for MockAccelerator {
    fn check_addr(&self, ptr: *const u8) -> Option<AddrInfo> {
        self.check_addr_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.resident.lock().unwrap().get(&(ptr as usize)).copied()
    }

    fn host_register(
        &self,
        _device: i32,
        ptr: *const u8,
        len: usize,
    ) -> Result<(), AccelError> {
        if self.fail_registration {
            return Err(AccelError("mock registration failure".into()));
        }
        self.registered.lock().unwrap().insert(ptr as usize, len);
        Ok(())
    }

    fn host_unregister(&self, _device: i32, ptr: *const u8) -> Result<(), AccelError> {
        self.unregistered.lock().unwrap().push(ptr as usize);
        if self.fail_registration {
            return Err(AccelError("mock unregistration failure".into()));
        }
        self.registered.lock().unwrap().remove(&(ptr as usize));
        Ok(())
    }
}
