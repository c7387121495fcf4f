//! Error types for device operations

/// Result type for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Errors that can occur while managing device memory
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// Invalid buffer handle
    #[error("invalid buffer handle {handle} on device {device}")]
    InvalidBufferHandle { device: String, handle: u64 },

    /// Buffer access out of bounds
    #[error("buffer access out of bounds: size {size} > buffer size {buffer_size}")]
    BufferOutOfBounds { size: usize, buffer_size: usize },

    /// Allocation refused by the device
    #[error("allocation of {requested} bytes failed on device {device}: {reason}")]
    AllocationFailed {
        device: String,
        requested: usize,
        reason: String,
    },

    /// Malformed fully qualified device name
    #[error("invalid device name {name:?}: {reason}")]
    InvalidDeviceName { name: String, reason: String },

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl DeviceError {
    /// Create an invalid device name error
    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDeviceName {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
