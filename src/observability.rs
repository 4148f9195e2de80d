//! Metrics collection using metrics-rs.
//!
//! stagebuf exposes the following metrics:
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `stagebuf_buffers_allocated` | Counter | Staging buffers handed to callers |
//! | `stagebuf_buffers_released` | Counter | Staging buffers returned by callers |
//! | `stagebuf_segments_acquired` | Counter | Raw segments mapped and pinned |
//! | `stagebuf_segments_released` | Counter | Raw segments unpinned and unmapped |
//! | `stagebuf_segment_bytes_acquired` | Counter | Bytes of raw segments acquired |
//! | `stagebuf_pinned_bytes` | Gauge | Bytes currently mapped for DMA |
//!
//! Use a metrics exporter (prometheus, statsd, ...) to collect them; with
//! no recorder installed every call is a no-op.

use metrics::{Unit, counter, gauge};
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

// Metric names as constants for consistency
const BUFFERS_ALLOCATED: &str = "stagebuf_buffers_allocated";
const BUFFERS_RELEASED: &str = "stagebuf_buffers_released";
const SEGMENTS_ACQUIRED: &str = "stagebuf_segments_acquired";
const SEGMENTS_RELEASED: &str = "stagebuf_segments_released";
const SEGMENT_BYTES_ACQUIRED: &str = "stagebuf_segment_bytes_acquired";
const PINNED_BYTES: &str = "stagebuf_pinned_bytes";

/// Initialize metrics descriptions.
///
/// Call this once at application startup before using any metrics.
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return; // Already initialized
    }

    metrics::describe_counter!(
        BUFFERS_ALLOCATED,
        Unit::Count,
        "Total staging buffers handed to callers"
    );
    metrics::describe_counter!(
        BUFFERS_RELEASED,
        Unit::Count,
        "Total staging buffers returned by callers"
    );
    metrics::describe_counter!(
        SEGMENTS_ACQUIRED,
        Unit::Count,
        "Total raw segments mapped and pinned"
    );
    metrics::describe_counter!(
        SEGMENTS_RELEASED,
        Unit::Count,
        "Total raw segments unpinned and unmapped"
    );
    metrics::describe_counter!(
        SEGMENT_BYTES_ACQUIRED,
        Unit::Bytes,
        "Total bytes of raw segments acquired"
    );
    metrics::describe_gauge!(PINNED_BYTES, Unit::Bytes, "Bytes currently mapped for DMA");
}

/// Record a staging buffer handed to a caller.
#[inline]
pub fn record_buffer_allocated() {
    counter!(BUFFERS_ALLOCATED).increment(1);
}

/// Record a staging buffer returned by a caller.
#[inline]
pub fn record_buffer_released() {
    counter!(BUFFERS_RELEASED).increment(1);
}

/// Record a raw segment acquisition of `bytes` bytes.
#[inline]
pub fn record_segment_acquired(bytes: usize) {
    counter!(SEGMENTS_ACQUIRED).increment(1);
    counter!(SEGMENT_BYTES_ACQUIRED).increment(bytes as u64);
}

/// Record a raw segment release.
#[inline]
pub fn record_segment_released() {
    counter!(SEGMENTS_RELEASED).increment(1);
}

/// Record the total bytes currently mapped for DMA.
#[inline]
pub fn record_pinned_bytes(total: usize) {
    gauge!(PINNED_BYTES).set(total as f64);
}
