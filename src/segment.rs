//! Page-granular host memory segments, pinned for accelerator DMA.
//!
//! The segment provider is the leaf of the allocator stack: it hands out
//! raw, page-aligned host memory and releases it again. Every segment is
//! registered with the accelerator runtime on acquisition so the device
//! can DMA into it directly, and unregistered (best effort) on release.
//!
//! # Design
//!
//! - Sizes are always rounded up to a whole multiple of the system page
//!   size, minimum one page. Anonymous `mmap` keeps segments naturally
//!   page-aligned.
//! - The provider never locks. All calls arrive already serialized under
//!   the staging allocator's lock.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use stagebuf::accel::NullAccelerator;
//! use stagebuf::segment::{PinnedSegmentProvider, SegmentProvider};
//!
//! let mut provider = PinnedSegmentProvider::new(Arc::new(NullAccelerator));
//! let page = provider.page_size();
//!
//! let segment = provider.acquire(1).unwrap();
//! assert_eq!(segment.len, page);
//!
//! provider.release(segment.ptr.as_ptr());
//! ```

use crate::accel::{AcceleratorRuntime, NO_DEVICE_ID};
use crate::error::{Error, Result};
use crate::observability::{record_pinned_bytes, record_segment_acquired, record_segment_released};
use rustix::io::Errno;
use rustix::mm::{MapFlags, ProtFlags};
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Arc;

/// A page-aligned block of raw host memory.
///
/// `len` is the actual (page-rounded) size, never smaller than the
/// requested size.
#[derive(Debug)]
pub struct Segment {
    /// Start of the block.
    pub ptr: NonNull<u8>,
    /// Actual size in bytes, a whole multiple of the page size.
    pub len: usize,
}

/// Supplies raw host memory segments to an allocator strategy.
///
/// Implementations must round requests up to page granularity and may
/// pin the memory for device access. Calls are serialized by the owning
/// allocator; implementations must not lock.
pub trait SegmentProvider: Send {
    /// Acquire a segment of at least `requested` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SegmentAllocationFailed`] if the underlying raw
    /// allocation fails.
    fn acquire(&mut self, requested: usize) -> Result<Segment>;

    /// Release a segment previously returned by
    /// [`acquire`](Self::acquire). A null pointer is a no-op.
    fn release(&mut self, ptr: *mut u8);

    /// The cached system page size in bytes.
    fn page_size(&self) -> usize;
}

/// Round `requested` up to a whole multiple of `page_size`, minimum one
/// page. `None` when the rounded size does not fit in `usize`.
#[inline]
pub(crate) fn round_to_pages(requested: usize, page_size: usize) -> Option<usize> {
    requested.div_ceil(page_size).max(1).checked_mul(page_size)
}

/// Production segment provider: anonymous `mmap` pages, host-registered
/// with the accelerator runtime.
///
/// Keeps a map of live segments so `release` knows the mapped length and
/// can detect pointers it never handed out.
pub struct PinnedSegmentProvider {
    runtime: Arc<dyn AcceleratorRuntime>,
    /// System page size, read once at construction.
    page_size: usize,
    /// Live segments: address -> mapped length.
    live: HashMap<usize, usize>,
    /// Total bytes currently mapped (and, runtime permitting, pinned).
    pinned_bytes: usize,
}

impl PinnedSegmentProvider {
    /// Create a provider backed by the given accelerator runtime.
    ///
    /// The system page size is queried once here and cached for all
    /// subsequent rounding.
    pub fn new(runtime: Arc<dyn AcceleratorRuntime>) -> Self {
        Self {
            runtime,
            page_size: rustix::param::page_size(),
            live: HashMap::new(),
            pinned_bytes: 0,
        }
    }

    /// Number of live segments currently tracked.
    pub fn live_segments(&self) -> usize {
        self.live.len()
    }

    /// Total bytes currently mapped.
    pub fn pinned_bytes(&self) -> usize {
        self.pinned_bytes
    }
}

impl SegmentProvider for PinnedSegmentProvider {
    fn acquire(&mut self, requested: usize) -> Result<Segment> {
        let len = round_to_pages(requested, self.page_size).ok_or(
            Error::SegmentAllocationFailed {
                len: requested,
                errno: Errno::NOMEM,
            },
        )?;

        // SAFETY: anonymous private mapping with no requested address;
        // the kernel picks a page-aligned range not overlapping anything.
        let raw = unsafe {
            rustix::mm::mmap_anonymous(
                std::ptr::null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::PRIVATE,
            )
        }
        .map_err(|errno| Error::SegmentAllocationFailed { len, errno })?;

        let ptr = NonNull::new(raw.cast::<u8>()).ok_or(Error::SegmentAllocationFailed {
            len,
            errno: Errno::NOMEM,
        })?;

        // Pin for device DMA. A failing runtime leaves the segment
        // pageable but still usable.
        if let Err(e) = self.runtime.host_register(NO_DEVICE_ID, ptr.as_ptr(), len) {
            tracing::warn!(len, error = %e, "host registration failed, segment stays pageable");
        }

        self.live.insert(ptr.as_ptr() as usize, len);
        self.pinned_bytes += len;
        record_segment_acquired(len);
        record_pinned_bytes(self.pinned_bytes);

        Ok(Segment { ptr, len })
    }

    fn release(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }

        let Some(len) = self.live.remove(&(ptr as usize)) else {
            tracing::warn!(addr = ptr as usize, "release of unknown segment, ignoring");
            return;
        };

        // The segment is host memory we pinned earlier, so the runtime
        // reports no device residency for it. Unregistration is best
        // effort: a failure must not block releasing the pages.
        if self.runtime.check_addr(ptr).is_none() {
            if let Err(e) = self.runtime.host_unregister(NO_DEVICE_ID, ptr) {
                tracing::warn!(addr = ptr as usize, error = %e, "host unregister failed");
            }
        }

        // SAFETY: ptr/len came from our own mmap and was removed from the
        // live map above, so no double unmap.
        unsafe {
            if let Err(e) = rustix::mm::munmap(ptr.cast(), len) {
                tracing::warn!(addr = ptr as usize, len, error = %e, "munmap failed");
            }
        }

        self.pinned_bytes -= len;
        record_segment_released();
        record_pinned_bytes(self.pinned_bytes);
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}

impl Drop for PinnedSegmentProvider {
    fn drop(&mut self) {
        // Strategies release their segments in finalize; anything still
        // live here was leaked by a caller.
        let leaked: Vec<usize> = self.live.keys().copied().collect();
        if !leaked.is_empty() {
            tracing::warn!(count = leaked.len(), "dropping provider with live segments");
        }
        for addr in leaked {
            self.release(addr as *mut u8);
        }
    }
}
