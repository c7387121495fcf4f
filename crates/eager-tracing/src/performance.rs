//! Performance-focused tracing utilities
//!
//! Two RAII guards live here:
//!
//! - [`PerformanceSpan`] times an arbitrary region and logs on drop.
//! - [`TransferSpan`] times a byte transfer and logs size and bandwidth on drop.
//!
//! Both honour the process-wide switch installed by [`configure`] (normally called
//! from [`crate::build_subscriber`]).
//!
//! ```rust
//! use eager_tracing::performance::{TransferDirection, TransferSpan};
//!
//! let span = TransferSpan::new(TransferDirection::DeviceToHost, 4096, "GPU:0");
//! // ... copy bytes ...
//! drop(span);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

static PERF_ENABLED: AtomicBool = AtomicBool::new(cfg!(debug_assertions));
static PERF_THRESHOLD_US: AtomicU64 = AtomicU64::new(0);

/// Install the process-wide performance tracing switch and threshold.
pub fn configure(enabled: bool, threshold_us: Option<u64>) {
    PERF_ENABLED.store(enabled, Ordering::Relaxed);
    PERF_THRESHOLD_US.store(threshold_us.unwrap_or(0), Ordering::Relaxed);
}

/// Whether performance spans currently emit events.
pub fn enabled() -> bool {
    PERF_ENABLED.load(Ordering::Relaxed)
}

fn should_log(elapsed_us: u64, local_threshold_us: Option<u64>) -> bool {
    if !enabled() {
        return false;
    }
    let threshold = local_threshold_us.unwrap_or_else(|| PERF_THRESHOLD_US.load(Ordering::Relaxed));
    elapsed_us >= threshold
}

/// RAII guard that measures a region and logs its duration when dropped.
pub struct PerformanceSpan {
    threshold_us: Option<u64>,
    start_time: Instant,
    span: tracing::Span,
}

impl PerformanceSpan {
    /// Create a new performance span; `threshold_us` overrides the global threshold.
    pub fn new(span_name: impl Into<String>, threshold_us: Option<u64>) -> Self {
        let span_name = span_name.into();
        Self {
            threshold_us,
            start_time: Instant::now(),
            span: tracing::debug_span!("perf", name = %span_name),
        }
    }

    /// Elapsed time since the span was created.
    pub fn elapsed_us(&self) -> u64 {
        self.start_time.elapsed().as_micros() as u64
    }
}

impl Drop for PerformanceSpan {
    fn drop(&mut self) {
        let elapsed_us = self.elapsed_us();
        if should_log(elapsed_us, self.threshold_us) {
            let _entered = self.span.enter();
            tracing::debug!(
                duration_us = elapsed_us,
                duration_ms = elapsed_us as f64 / 1000.0,
                "performance_span_complete"
            );
        }
    }
}

/// Direction of a tensor byte transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    HostToDevice,
    DeviceToHost,
    Remote,
    CustomDevice,
}

impl TransferDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferDirection::HostToDevice => "H2D",
            TransferDirection::DeviceToHost => "D2H",
            TransferDirection::Remote => "remote",
            TransferDirection::CustomDevice => "custom",
        }
    }
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RAII guard that logs byte count and bandwidth of a transfer when dropped.
///
/// Call [`TransferSpan::fail`] before dropping when the transfer did not complete;
/// failed transfers are logged without bandwidth.
pub struct TransferSpan {
    direction: TransferDirection,
    bytes: usize,
    device: String,
    start_time: Instant,
    failed: bool,
}

impl TransferSpan {
    pub fn new(direction: TransferDirection, bytes: usize, device: impl Into<String>) -> Self {
        Self {
            direction,
            bytes,
            device: device.into(),
            start_time: Instant::now(),
            failed: false,
        }
    }

    /// Mark the transfer as failed.
    pub fn fail(&mut self) {
        self.failed = true;
    }

    /// Update the byte count once it is known (remote fetches learn it late).
    pub fn set_bytes(&mut self, bytes: usize) {
        self.bytes = bytes;
    }
}

impl Drop for TransferSpan {
    fn drop(&mut self) {
        let duration_us = self.start_time.elapsed().as_micros() as u64;
        if self.failed {
            tracing::debug!(
                direction = %self.direction,
                device = %self.device,
                duration_us,
                "tensor_transfer_failed"
            );
            return;
        }
        if !should_log(duration_us, None) {
            return;
        }
        let bandwidth_mbps = if duration_us > 0 {
            (self.bytes as f64 / duration_us as f64) * 1_000_000.0 / (1024.0 * 1024.0)
        } else {
            0.0
        };
        tracing::debug!(
            direction = %self.direction,
            device = %self.device,
            bytes = self.bytes,
            kb = self.bytes as f64 / 1024.0,
            duration_us,
            bandwidth_mbps,
            "tensor_transfer"
        );
    }
}
