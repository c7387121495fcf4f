//! Resolution metrics
//!
//! Every call to [`crate::TensorHandle::resolve`] records which path produced the
//! host value and how long it took, then logs the record at debug level:
//!
//! ```text
//! DEBUG eager_core::instrumentation: handle=7 path="device_copy" mirrored=true bytes=4096 duration_us=31 resolve_complete
//! ```

use std::fmt;

/// Branch of the resolution algorithm that produced the value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvePath {
    /// Custom device plugin copies, followed by resolution of the final standard handle
    CustomDevice { hops: usize },
    /// Copy from a remote task
    Remote,
    /// Local tensor already host-resident, aliased without a copy
    HostResident,
    /// Previously filled local mirror
    Mirror,
    /// Device→host copy; `mirrored` when the result was cached
    DeviceCopy { mirrored: bool },
}

impl ResolvePath {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolvePath::CustomDevice { .. } => "custom_device",
            ResolvePath::Remote => "remote",
            ResolvePath::HostResident => "host_resident",
            ResolvePath::Mirror => "mirror",
            ResolvePath::DeviceCopy { .. } => "device_copy",
        }
    }

    /// Whether this path went through a copy
    pub fn copied(&self) -> bool {
        !matches!(self, ResolvePath::HostResident | ResolvePath::Mirror)
    }
}

impl fmt::Display for ResolvePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metrics for one resolution
#[derive(Debug, Clone)]
pub struct ResolveMetrics {
    /// Handle id
    pub handle: u64,
    /// Path taken
    pub path: ResolvePath,
    /// Size of the resolved value
    pub bytes: usize,
    /// Wall time (microseconds)
    pub duration_us: u64,
}

impl ResolveMetrics {
    pub fn new(handle: u64, path: ResolvePath, bytes: usize, duration_us: u64) -> Self {
        Self {
            handle,
            path,
            bytes,
            duration_us,
        }
    }

    /// Throughput in MB/s, 0 when nothing was copied or no time elapsed
    pub fn bandwidth_mbps(&self) -> f64 {
        if !self.path.copied() || self.duration_us == 0 {
            return 0.0;
        }
        (self.bytes as f64 / self.duration_us as f64) * 1_000_000.0 / (1024.0 * 1024.0)
    }

    /// Log metrics via tracing
    pub fn log(&self) {
        let (hops, mirrored) = match self.path {
            ResolvePath::CustomDevice { hops } => (hops, false),
            ResolvePath::DeviceCopy { mirrored } => (0, mirrored),
            _ => (0, false),
        };
        tracing::debug!(
            handle = self.handle,
            path = %self.path,
            hops,
            mirrored,
            bytes = self.bytes,
            duration_us = self.duration_us,
            bandwidth_mbps = self.bandwidth_mbps(),
            "resolve_complete"
        );
    }
}
