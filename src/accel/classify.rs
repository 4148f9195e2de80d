//! Pointer classification.

use super::{AccelKind, AcceleratorRuntime, UNIFIED_MEMORY};
use crate::handle::HandleFlags;

/// Classify where `ptr` resides.
///
/// When the handle carries [`HandleFlags::ASSERT_NO_ACCEL_BUFFERS`] the
/// runtime is never queried and the answer is [`AccelKind::Host`]; the
/// flag is a trusted caller hint that skips a potentially expensive
/// runtime round-trip on every I/O call.
///
/// Otherwise the runtime's address check decides: a resident allocation
/// with the unified-memory bit maps to [`AccelKind::ManagedDevice`], a
/// resident allocation without it to [`AccelKind::Device`], and anything
/// else (including a failed query, expected on CPU-only deployments) to
/// [`AccelKind::Host`].
///
/// Pure query: no allocation, no locks.
pub fn classify(
    runtime: &dyn AcceleratorRuntime,
    flags: HandleFlags,
    ptr: *const u8,
) -> AccelKind {
    if flags.contains(HandleFlags::ASSERT_NO_ACCEL_BUFFERS) {
        return AccelKind::Host;
    }

    match runtime.check_addr(ptr) {
        Some(info) if info.flags & UNIFIED_MEMORY != 0 => AccelKind::ManagedDevice {
            device: info.device,
        },
        Some(info) => AccelKind::Device {
            device: info.device,
        },
        None => AccelKind::Host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::{AddrInfo, MockAccelerator, NullAccelerator};

    #[test]
    fn test_host_when_not_resident() {
        let runtime = NullAccelerator;
        let kind = classify(&runtime, HandleFlags::NONE, 0x1000 as *const u8);
        assert_eq!(kind, AccelKind::Host);
    }

    #[test]
    fn test_device_when_resident() {
        let ptr = 0x2000 as *const u8;
        let runtime = MockAccelerator::with_resident(ptr, AddrInfo { device: 3, flags: 0 });

        let kind = classify(&runtime, HandleFlags::NONE, ptr);
        assert_eq!(kind, AccelKind::Device { device: 3 });
        assert!(kind.is_device());
        assert!(!kind.is_managed());
    }

    #[test]
    fn test_managed_when_unified_flag_set() {
        let ptr = 0x3000 as *const u8;
        let runtime = MockAccelerator::with_resident(
            ptr,
            AddrInfo {
                device: 0,
                flags: UNIFIED_MEMORY,
            },
        );

        let kind = classify(&runtime, HandleFlags::NONE, ptr);
        assert_eq!(kind, AccelKind::ManagedDevice { device: 0 });
        assert!(kind.is_managed());
    }

    #[test]
    fn test_bypass_flag_skips_runtime_query() {
        // Even a device-resident pointer classifies as host when the
        // handle promises there are no accelerator buffers.
        let ptr = 0x4000 as *const u8;
        let runtime = MockAccelerator::with_resident(ptr, AddrInfo { device: 1, flags: 0 });

        let kind = classify(&runtime, HandleFlags::ASSERT_NO_ACCEL_BUFFERS, ptr);
        assert_eq!(kind, AccelKind::Host);
        assert_eq!(runtime.check_addr_count(), 0);
    }

    #[test]
    fn test_other_pointer_still_host() {
        let resident = 0x5000 as *const u8;
        let runtime =
            MockAccelerator::with_resident(resident, AddrInfo { device: 0, flags: 0 });

        let kind = classify(&runtime, HandleFlags::NONE, 0x6000 as *const u8);
        assert_eq!(kind, AccelKind::Host);
        assert_eq!(runtime.check_addr_count(), 1);
    }
}
