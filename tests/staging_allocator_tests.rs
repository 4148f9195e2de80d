//! Integration tests for the staging allocator lifecycle under
//! concurrency.
//!
//! These tests exercise the allocator the way an I/O subsystem does:
//! many worker threads racing lazy initialization, allocating and
//! releasing staging buffers concurrently, and tearing the subsystem
//! down between I/O phases.

use stagebuf::accel::{AccelError, AcceleratorRuntime, AddrInfo};
use stagebuf::allocator::StagingAllocator;
use stagebuf::handle::HandleFlags;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

/// Runtime double that counts registration traffic.
#[derive(Default)]
struct CountingRuntime {
    registers: AtomicUsize,
    unregisters: AtomicUsize,
}

impl AcceleratorRuntime for CountingRuntime {
    fn check_addr(&self, _ptr: *const u8) -> Option<AddrInfo> {
        None
    }

    fn host_register(&self, _device: i32, _ptr: *const u8, _len: usize) -> Result<(), AccelError> {
        self.registers.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn host_unregister(&self, _device: i32, _ptr: *const u8) -> Result<(), AccelError> {
        self.unregisters.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Lazy Initialization Tests
// ============================================================================

/// N threads racing init all succeed and observe an initialized
/// allocator; nothing is mapped or pinned until a buffer is requested.
#[test]
fn test_concurrent_init_is_idempotent() {
    let runtime = Arc::new(CountingRuntime::default());
    let staging = Arc::new(StagingAllocator::new(Arc::clone(&runtime) as Arc<dyn AcceleratorRuntime>));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let staging = Arc::clone(&staging);
            thread::spawn(move || staging.init())
        })
        .collect();

    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    assert!(staging.is_initialized());
    assert_eq!(runtime.registers.load(Ordering::SeqCst), 0);

    // The single shared strategy serves requests after the race.
    let buf = staging.allocate(HandleFlags::NONE, 1).unwrap();
    assert_eq!(runtime.registers.load(Ordering::SeqCst), 1);
    staging.release(HandleFlags::NONE, buf.as_ptr());
}

/// Threads racing the very first allocate: every request is served from
/// the one strategy constructed by the race winner.
#[test]
fn test_concurrent_first_allocate() {
    let staging = Arc::new(StagingAllocator::cpu_only());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let staging = Arc::clone(&staging);
            thread::spawn(move || {
                let buf = staging.allocate(HandleFlags::NONE, 1024 * (i + 1)).unwrap();
                let addr = buf.as_ptr() as usize;
                staging.release(HandleFlags::NONE, buf.as_ptr());
                addr
            })
        })
        .collect();

    for handle in handles {
        assert_ne!(handle.join().unwrap(), 0);
    }
    assert!(staging.is_initialized());
}

// ============================================================================
// Mutual Exclusion Tests
// ============================================================================

/// Concurrently held buffers never alias: each address is unique among
/// the buffers live at any moment.
#[test]
fn test_held_buffers_never_alias() {
    let staging = Arc::new(StagingAllocator::cpu_only());
    let held: Arc<Mutex<HashSet<usize>>> = Arc::new(Mutex::new(HashSet::new()));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let staging = Arc::clone(&staging);
            let held = Arc::clone(&held);
            thread::spawn(move || {
                for i in 0..50 {
                    let size = 4096 * (1 + (t + i) % 4);
                    let buf = staging.allocate(HandleFlags::NONE, size).unwrap();
                    let addr = buf.as_ptr() as usize;

                    // Write through the buffer to catch handed-out memory
                    // that another thread also owns.
                    unsafe {
                        std::ptr::write_bytes(buf.as_ptr(), t as u8, size);
                    }

                    assert!(
                        held.lock().unwrap().insert(addr),
                        "allocator handed out an address already held"
                    );
                    assert!(held.lock().unwrap().remove(&addr));
                    staging.release(HandleFlags::NONE, addr as *mut u8);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

/// Allocate/release traffic racing finalize never observes a
/// half-constructed or half-destroyed strategy: every call either fully
/// succeeds or fails cleanly.
#[test]
fn test_allocate_races_finalize_safely() {
    let staging = Arc::new(StagingAllocator::cpu_only());

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let staging = Arc::clone(&staging);
            thread::spawn(move || {
                for _ in 0..100 {
                    if let Ok(buf) = staging.allocate(HandleFlags::NONE, 4096) {
                        staging.release(HandleFlags::NONE, buf.as_ptr());
                    }
                }
            })
        })
        .collect();

    let finalizer = {
        let staging = Arc::clone(&staging);
        thread::spawn(move || {
            for _ in 0..20 {
                staging.finalize().unwrap();
                thread::yield_now();
            }
        })
    };

    for worker in workers {
        worker.join().unwrap();
    }
    finalizer.join().unwrap();

    // Whatever the interleaving, the allocator still works afterwards.
    let buf = staging.allocate(HandleFlags::NONE, 4096).unwrap();
    staging.release(HandleFlags::NONE, buf.as_ptr());
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

/// Finalize then reallocate: teardown is not a lockout.
#[test]
fn test_finalize_then_reallocate_round_trips() {
    let staging = StagingAllocator::cpu_only();

    for _ in 0..3 {
        let buf = staging.allocate(HandleFlags::NONE, 8192).unwrap();
        staging.release(HandleFlags::NONE, buf.as_ptr());
        staging.finalize().unwrap();
        assert!(!staging.is_initialized());
    }
}

/// Round-trip over the representative size set, with page rounding
/// verified through the public surface.
#[test]
fn test_round_trip_representative_sizes() {
    let staging = StagingAllocator::cpu_only();
    staging.init().unwrap();
    let page = staging.page_size().unwrap();

    for size in [0, 1, page - 1, page, page + 1, 10 * page] {
        let buf = staging.allocate(HandleFlags::NONE, size).unwrap();
        assert_eq!(buf.as_ptr() as usize % page, 0, "buffer not page-aligned");

        // The rounded size is writable end to end.
        let rounded = size.div_ceil(page).max(1) * page;
        unsafe {
            std::ptr::write_bytes(buf.as_ptr(), 0xa5, rounded);
        }

        staging.release(HandleFlags::NONE, buf.as_ptr());

        let again = staging.allocate(HandleFlags::NONE, size).unwrap();
        staging.release(HandleFlags::NONE, again.as_ptr());
    }

    staging.finalize().unwrap();
}

/// Freed buffers are recycled: steady-state traffic of one size maps and
/// registers exactly one segment.
#[test]
fn test_recycling_avoids_repinning() {
    let runtime = Arc::new(CountingRuntime::default());
    let staging = StagingAllocator::new(Arc::clone(&runtime) as Arc<dyn AcceleratorRuntime>);

    for _ in 0..100 {
        let buf = staging.allocate(HandleFlags::NONE, 64 * 1024).unwrap();
        staging.release(HandleFlags::NONE, buf.as_ptr());
    }

    assert_eq!(runtime.registers.load(Ordering::SeqCst), 1);

    staging.finalize().unwrap();
    assert_eq!(runtime.unregisters.load(Ordering::SeqCst), 1);
}
