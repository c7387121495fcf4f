//! Error types for eager-core operations

use crate::tensor::DType;
use eager_devices::DeviceError;

/// Result type for eager-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while creating, resolving or executing against tensor handles
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A copy through the copy executor could not complete
    #[error("copy to {target} failed: {source}")]
    CopyFailed { target: String, source: Box<Error> },

    /// A local value could not be read as host memory
    #[error("read failed: {0}")]
    ReadFailed(String),

    /// A custom device plugin reported an error
    #[error("custom device {device}: {message}")]
    CustomDevice { device: String, message: String },

    /// Custom device copies kept producing custom-device handles
    #[error("custom device chain exceeded {limit} hops (last device: {device})")]
    CustomDeviceHopLimit { limit: usize, device: String },

    /// A remote handle was copied without a transport configured
    #[error("no remote transport configured for tensor on {device}")]
    RemoteTransportUnavailable { device: String },

    /// The remote transport failed to deliver a tensor
    #[error("remote transport error: {0}")]
    Transport(String),

    /// The context that created a handle no longer exists
    #[error("context was dropped")]
    ContextDropped,

    /// The handle carries no local tensor
    #[error("tensor handle {handle} has no local tensor ({reason})")]
    NotLocal { handle: u64, reason: &'static str },

    /// The handle has no host mirror yet
    #[error("tensor handle {handle} has no local mirror")]
    NoLocalMirror { handle: u64 },

    /// Operation execution failed after `filled` output slots were written
    #[error("execution of {op} failed after {filled} outputs: {source}")]
    Execution {
        op: String,
        filled: usize,
        source: Box<Error>,
    },

    /// The execution subsystem reported more outputs than slots
    #[error("{op} reported {reported} outputs for {capacity} slots")]
    InvalidOutputCount {
        op: String,
        reported: usize,
        capacity: usize,
    },

    /// No host kernel is registered under this op name
    #[error("no kernel registered for op {0}")]
    KernelNotFound(String),

    /// No device with this name is known to the context
    #[error("unknown device {0}")]
    UnknownDevice(String),

    /// Shape mismatch
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch { expected: Vec<usize>, actual: Vec<usize> },

    /// Type mismatch
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: DType, actual: DType },

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Device layer error
    #[error(transparent)]
    Device(#[from] DeviceError),
}

impl Error {
    /// Wrap an execution failure, recording how many output slots were filled
    pub fn partial_execution(op: impl Into<String>, filled: usize, source: Error) -> Self {
        Self::Execution {
            op: op.into(),
            filled,
            source: Box::new(source),
        }
    }

    /// Create a custom device error
    pub fn custom_device(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CustomDevice {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Number of valid output slots when this is an execution failure
    pub fn filled_outputs(&self) -> Option<usize> {
        match self {
            Error::Execution { filled, .. } => Some(*filled),
            _ => None,
        }
    }
}
