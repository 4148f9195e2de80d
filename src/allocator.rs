//! The staging allocator: shared lifecycle and serialization around a
//! pluggable allocator strategy.
//!
//! `StagingAllocator` is the surface the I/O layer talks to. One instance
//! has process-wide lifetime and is shared by reference (typically inside
//! an `Arc`) with every caller that stages data through host buffers.
//!
//! # Lifecycle
//!
//! The underlying strategy is constructed lazily on first use, exactly
//! once no matter how many threads race the first call. An explicit
//! [`finalize`](StagingAllocator::finalize) tears it down; the next use
//! after that reconstructs it, so the lifecycle is re-entrant rather than
//! single-shot.
//!
//! An atomic counter fast-paths the already-initialized case, but the
//! decision to construct is always tied to the presence of the strategy
//! under the lock. A construction attempt that failed (for example with
//! an unknown strategy name) therefore retries on the next call instead
//! of being skipped because the counter already advanced.
//!
//! # Concurrency
//!
//! Every strategy operation (construction, alloc, free, finalize) runs
//! under one mutex, so no two of them ever execute concurrently and the
//! strategy itself needs no internal synchronization. Once a buffer
//! pointer is handed out, the caller owns it exclusively until
//! [`release`](StagingAllocator::release).
//!
//! # Example
//!
//! ```rust
//! use stagebuf::allocator::StagingAllocator;
//! use stagebuf::handle::HandleFlags;
//!
//! let staging = StagingAllocator::cpu_only();
//!
//! let buf = staging.allocate(HandleFlags::NONE, 64 * 1024).unwrap();
//! // ... stage file data through the buffer ...
//! staging.release(HandleFlags::NONE, buf.as_ptr());
//!
//! staging.finalize().unwrap();
//! ```

use crate::accel::{self, AccelKind, AcceleratorRuntime, NullAccelerator};
use crate::error::{Error, Result};
use crate::handle::HandleFlags;
use crate::observability::{record_buffer_allocated, record_buffer_released};
use crate::segment::{PinnedSegmentProvider, SegmentProvider};
use crate::strategy::{AllocatorStrategy, BasicStrategy, resolve_strategy};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// The lazily constructed allocator state.
struct AllocatorCore {
    strategy: Box<dyn AllocatorStrategy>,
    /// System page size, cached at construction.
    page_size: usize,
}

/// Process-wide staging buffer allocator.
///
/// See the [module documentation](self) for lifecycle and concurrency
/// details.
pub struct StagingAllocator {
    runtime: Arc<dyn AcceleratorRuntime>,
    strategy_name: String,
    /// Counts initialization requests. Fast-path hint only; never
    /// consulted to decide teardown.
    init_count: AtomicU32,
    core: Mutex<Option<AllocatorCore>>,
}

impl StagingAllocator {
    /// Create an allocator backed by the given accelerator runtime,
    /// using the default "basic" strategy.
    ///
    /// Construction is cheap; no memory is mapped until the first
    /// [`allocate`](Self::allocate) or [`init`](Self::init).
    pub fn new(runtime: Arc<dyn AcceleratorRuntime>) -> Self {
        Self::with_strategy(runtime, BasicStrategy::NAME)
    }

    /// Create an allocator selecting the strategy by identifier.
    ///
    /// An unknown identifier is not reported here but by the first call
    /// that triggers construction.
    pub fn with_strategy(runtime: Arc<dyn AcceleratorRuntime>, strategy: &str) -> Self {
        Self {
            runtime,
            strategy_name: strategy.to_string(),
            init_count: AtomicU32::new(0),
            core: Mutex::new(None),
        }
    }

    /// Create an allocator for a deployment without any accelerator.
    pub fn cpu_only() -> Self {
        Self::new(Arc::new(NullAccelerator))
    }

    /// Classify where `ptr` resides, honoring the handle's bypass flag.
    ///
    /// Lock-free; safe to call on every I/O operation.
    pub fn classify(&self, flags: HandleFlags, ptr: *const u8) -> AccelKind {
        accel::classify(self.runtime.as_ref(), flags, ptr)
    }

    /// Allocate a staging buffer of at least `size` bytes for an I/O
    /// handle carrying `flags`.
    ///
    /// The buffer is page-rounded, page-aligned host memory, pinned for
    /// device DMA where the runtime supports it. Ownership transfers to
    /// the caller until [`release`](Self::release). Per-handle flags do
    /// not influence staging today; the parameter mirrors
    /// [`classify`](Self::classify) so every facade call takes the
    /// handle's flags.
    ///
    /// # Errors
    ///
    /// [`Error::StrategyUnavailable`] or [`Error::ConstructionFailed`]
    /// when lazy construction fails, [`Error::SegmentAllocationFailed`]
    /// when backing memory cannot be obtained. Failures are not retried
    /// internally.
    pub fn allocate(&self, flags: HandleFlags, size: usize) -> Result<NonNull<u8>> {
        let _ = flags;
        if self.init_count.load(Ordering::Acquire) == 0 {
            self.init_count.fetch_add(1, Ordering::AcqRel);
        }

        let mut guard = self.lock_core();
        let core = self.ensure_core(&mut guard)?;
        let ptr = core.strategy.alloc(size, 0)?;
        record_buffer_allocated();
        Ok(ptr)
    }

    /// Return a buffer obtained from [`allocate`](Self::allocate).
    ///
    /// A null pointer is a no-op. Releasing before anything was ever
    /// allocated is a caller invariant violation; it is logged and the
    /// call returns without touching memory.
    pub fn release(&self, flags: HandleFlags, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }

        if self.init_count.load(Ordering::Acquire) == 0 {
            tracing::error!(
                addr = ptr as usize,
                flags = flags.bits(),
                "release called but the allocator was never initialized"
            );
        }

        let mut guard = self.lock_core();
        match guard.as_mut() {
            Some(core) => {
                core.strategy.free(ptr);
                record_buffer_released();
            }
            None => {
                tracing::error!(addr = ptr as usize, "release with no allocator core, dropping");
            }
        }
    }

    /// Eagerly initialize the shared strategy.
    ///
    /// Optional: the first [`allocate`](Self::allocate) initializes on
    /// demand. Calling this from N threads concurrently performs exactly
    /// one construction and returns success to all of them.
    pub fn init(&self) -> Result<()> {
        self.init_count.fetch_add(1, Ordering::AcqRel);
        let mut guard = self.lock_core();
        self.ensure_core(&mut guard).map(|_| ())
    }

    /// Tear down the shared strategy, releasing all recycled segments.
    ///
    /// A no-op when nothing is initialized. The lifecycle is re-entrant:
    /// a later `allocate` reconstructs the strategy.
    pub fn finalize(&self) -> Result<()> {
        let mut guard = self.lock_core();
        if let Some(mut core) = guard.take() {
            core.strategy.finalize();
            self.init_count.store(0, Ordering::Release);
            tracing::debug!("staging allocator finalized");
        }
        Ok(())
    }

    /// Whether the shared strategy currently exists.
    pub fn is_initialized(&self) -> bool {
        self.lock_core().is_some()
    }

    /// The cached system page size, if initialized.
    pub fn page_size(&self) -> Option<usize> {
        self.lock_core().as_ref().map(|core| core.page_size)
    }

    fn lock_core(&self) -> MutexGuard<'_, Option<AllocatorCore>> {
        // A panic while holding the lock leaves no broken invariant the
        // strategy could observe, so poisoning is cleared rather than
        // propagated.
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Construct the core if absent. Presence of the core, not the init
    /// counter, decides whether construction runs.
    fn ensure_core<'a>(
        &self,
        guard: &'a mut Option<AllocatorCore>,
    ) -> Result<&'a mut AllocatorCore> {
        if guard.is_none() {
            let provider = PinnedSegmentProvider::new(Arc::clone(&self.runtime));
            let page_size = provider.page_size();
            let strategy = resolve_strategy(&self.strategy_name, Box::new(provider))?;
            tracing::debug!(
                strategy = %self.strategy_name,
                page_size,
                "staging allocator constructed"
            );
            *guard = Some(AllocatorCore { strategy, page_size });
        }
        guard
            .as_mut()
            .ok_or_else(|| Error::ConstructionFailed("allocator core absent".into()))
    }
}

impl Drop for StagingAllocator {
    fn drop(&mut self) {
        let _ = self.finalize();
    }
}
