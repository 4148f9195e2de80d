//! Pluggable allocator strategies.
//!
//! A strategy carves provider-supplied segments into caller-sized buffers
//! and recycles freed buffers. Strategies are selected by a fixed
//! identifier at construction time via [`resolve_strategy`]; the staging
//! allocator depends only on the [`AllocatorStrategy`] contract, not on
//! any strategy's internals.
//!
//! All strategy calls are serialized by the staging allocator's lock, so
//! implementations are single-threaded by contract.

use crate::error::{Error, Result};
use crate::segment::{SegmentProvider, round_to_pages};
use rustix::io::Errno;
use std::collections::HashMap;
use std::ptr::NonNull;

/// Contract every allocator strategy satisfies.
///
/// Buffer ownership transfers to the caller on `alloc` and back on
/// `free`; `finalize` returns all recycled segments to the provider.
pub trait AllocatorStrategy: Send {
    /// Allocate a buffer of at least `size` bytes.
    ///
    /// `align` is a hint; strategies backed by page-granular segments
    /// satisfy any alignment up to the page size for free.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SegmentAllocationFailed`] when backing memory
    /// cannot be obtained.
    fn alloc(&mut self, size: usize, align: usize) -> Result<NonNull<u8>>;

    /// Return a buffer previously handed out by [`alloc`](Self::alloc).
    fn free(&mut self, ptr: *mut u8);

    /// Tear the strategy down, releasing all segments it holds.
    fn finalize(&mut self);
}

impl std::fmt::Debug for dyn AllocatorStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn AllocatorStrategy")
    }
}

/// Look up and construct a strategy by its fixed identifier.
///
/// # Errors
///
/// Returns [`Error::StrategyUnavailable`] when no strategy with that
/// name is registered.
pub fn resolve_strategy(
    name: &str,
    provider: Box<dyn SegmentProvider>,
) -> Result<Box<dyn AllocatorStrategy>> {
    match name {
        BasicStrategy::NAME => Ok(Box::new(BasicStrategy::new(provider))),
        other => Err(Error::StrategyUnavailable(other.to_string())),
    }
}

/// The "basic" bin strategy: one page-rounded segment per buffer, with
/// freed segments recycled on per-size free lists.
///
/// Simple and predictable: a buffer of rounded size `n` always maps to a
/// dedicated segment of size `n`, and freeing it parks the segment for
/// the next same-sized request instead of unmapping it. Staging buffers
/// in an I/O subsystem cluster around a few sizes, so the free lists hit
/// almost always after warm-up.
pub struct BasicStrategy {
    provider: Box<dyn SegmentProvider>,
    /// Recycled segments, keyed by their page-rounded size.
    free: HashMap<usize, Vec<NonNull<u8>>>,
    /// Buffers currently owned by callers: address -> rounded size.
    live: HashMap<usize, usize>,
}

impl BasicStrategy {
    /// Identifier under which [`resolve_strategy`] finds this strategy.
    pub const NAME: &'static str = "basic";

    /// Create the strategy on top of a segment provider.
    pub fn new(provider: Box<dyn SegmentProvider>) -> Self {
        Self {
            provider,
            free: HashMap::new(),
            live: HashMap::new(),
        }
    }

    /// Number of buffers currently held by callers.
    pub fn live_buffers(&self) -> usize {
        self.live.len()
    }

    /// Number of recycled segments waiting for reuse.
    pub fn recycled_segments(&self) -> usize {
        self.free.values().map(Vec::len).sum()
    }

    fn rounded(&self, size: usize) -> Result<usize> {
        round_to_pages(size, self.provider.page_size()).ok_or(Error::SegmentAllocationFailed {
            len: size,
            errno: Errno::NOMEM,
        })
    }
}

impl AllocatorStrategy for BasicStrategy {
    fn alloc(&mut self, size: usize, align: usize) -> Result<NonNull<u8>> {
        debug_assert!(
            align <= self.provider.page_size(),
            "alignment beyond page size is not supported"
        );

        let rounded = self.rounded(size)?;
        let ptr = match self.free.get_mut(&rounded).and_then(Vec::pop) {
            Some(recycled) => recycled,
            None => self.provider.acquire(size)?.ptr,
        };

        self.live.insert(ptr.as_ptr() as usize, rounded);
        Ok(ptr)
    }

    fn free(&mut self, ptr: *mut u8) {
        let Some(ptr) = NonNull::new(ptr) else {
            return;
        };

        let Some(rounded) = self.live.remove(&(ptr.as_ptr() as usize)) else {
            tracing::warn!(addr = ptr.as_ptr() as usize, "free of unknown buffer, ignoring");
            return;
        };

        // Recycle rather than unmap. Segments only go back to the
        // provider at finalize.
        self.free.entry(rounded).or_default().push(ptr);
    }

    fn finalize(&mut self) {
        if !self.live.is_empty() {
            tracing::warn!(
                count = self.live.len(),
                "finalizing with outstanding buffers"
            );
        }
        for (_, ptrs) in self.free.drain() {
            for ptr in ptrs {
                self.provider.release(ptr.as_ptr());
            }
        }
        for (addr, _) in self.live.drain() {
            self.provider.release(addr as *mut u8);
        }
    }
}

impl Drop for BasicStrategy {
    fn drop(&mut self) {
        self.finalize();
    }
}

// SAFETY: the raw pointers in the free and live maps are plain host
// memory owned by this strategy; all access is serialized by the staging
// allocator's lock.
unsafe impl Send for BasicStrategy {}
