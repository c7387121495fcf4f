//! Standard device trait
//!
//! A standard device owns linear buffers and can move bytes between those buffers
//! and host memory. Plugin (custom) devices are not modelled here; they live at the
//! tensor-handle layer because their copy capability produces handles, not bytes.

use crate::error::Result;
use crate::types::{BufferHandle, DeviceKind, DeviceName};

/// Interface every standard device implements
///
/// # Memory Model
///
/// ```text
/// host slice ──copy_to_buffer──▶ device buffer ──copy_from_buffer──▶ host slice
/// ```
///
/// Devices are shared across the runtime behind `Arc<dyn Device>`, so every method
/// takes `&self`; implementations synchronise their own memory managers.
///
/// # Usage
///
/// ```rust
/// use eager_devices::{Device, MemoryDevice};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let gpu = MemoryDevice::accelerator(0);
/// let buffer = gpu.allocate_buffer(16)?;
/// gpu.copy_to_buffer(buffer, &[1u8; 16])?;
///
/// let mut out = [0u8; 16];
/// gpu.copy_from_buffer(buffer, &mut out)?;
/// assert_eq!(out, [1u8; 16]);
///
/// gpu.free_buffer(buffer)?;
/// # Ok(())
/// # }
/// ```
pub trait Device: Send + Sync {
    /// Fully qualified name of this device
    fn name(&self) -> &DeviceName;

    /// Coarse device classification
    fn kind(&self) -> DeviceKind;

    /// True when buffers live in accelerator memory rather than host memory
    ///
    /// A device without accelerator backing is treated as host-resident by the
    /// resolution engine even if its name says otherwise.
    fn has_accelerator_backing(&self) -> bool {
        matches!(self.kind(), DeviceKind::Accelerator)
    }

    /// Allocate a buffer of the given size in bytes
    fn allocate_buffer(&self, size: usize) -> Result<BufferHandle>;

    /// Free a previously allocated buffer
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer handle is invalid.
    fn free_buffer(&self, handle: BufferHandle) -> Result<()>;

    /// Copy data from host to buffer
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Buffer handle is invalid
    /// - Data size exceeds buffer size
    fn copy_to_buffer(&self, handle: BufferHandle, data: &[u8]) -> Result<()>;

    /// Copy data from buffer to host
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Buffer handle is invalid
    /// - Destination size exceeds buffer size
    fn copy_from_buffer(&self, handle: BufferHandle, data: &mut [u8]) -> Result<()>;

    /// Get buffer size in bytes
    fn buffer_size(&self, handle: BufferHandle) -> Result<usize>;

    /// Downcast to the concrete device type
    fn as_any(&self) -> &dyn std::any::Any;
}
