//! Where a tensor handle's memory lives
//!
//! ```text
//! DeviceRef
//! ├── Standard(None)          host CPU of the owning context
//! ├── Standard(Some(device))  a local standard device (CPU-kind or accelerator)
//! └── Custom(plugin)          a plugin that copies tensors out itself
//! ```

use crate::error::Result;
use crate::handle::TensorHandle;
use eager_devices::{Device, DeviceName};
use std::fmt;
use std::sync::Arc;

/// A pluggable device that supplies its own copy capability
///
/// Resolution asks the plugin to copy a handle it owns onto the host CPU. The plugin
/// may return a handle that still lives on a custom device (its own or another
/// plugin's); resolution keeps asking until a standard handle comes back.
pub trait CustomDevice: Send + Sync {
    /// Fully qualified name of this device
    fn name(&self) -> &DeviceName;

    /// Produce a new handle holding the value of `handle`, placed on `target`
    ///
    /// Plugins create the returned handle through [`TensorHandle::context`].
    fn copy_tensor_from_device(&self, handle: &TensorHandle, target: &DeviceName) -> Result<TensorHandle>;
}

/// Device reference held by every tensor handle
#[derive(Clone)]
pub enum DeviceRef {
    /// Standard device; `None` means the host CPU
    Standard(Option<Arc<dyn Device>>),
    /// Custom device plugin
    Custom(Arc<dyn CustomDevice>),
}

impl DeviceRef {
    /// The host CPU
    pub fn host() -> Self {
        DeviceRef::Standard(None)
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, DeviceRef::Custom(_))
    }

    /// True when memory behind this reference is directly host-addressable
    ///
    /// Custom devices never are. A standard device is when it is the host (`None`)
    /// or reports no accelerator backing.
    pub fn is_effectively_cpu(&self) -> bool {
        match self {
            DeviceRef::Custom(_) => false,
            DeviceRef::Standard(None) => true,
            DeviceRef::Standard(Some(device)) => !device.has_accelerator_backing(),
        }
    }

    /// The standard device, if this is a non-host standard reference
    pub fn standard_device(&self) -> Option<&Arc<dyn Device>> {
        match self {
            DeviceRef::Standard(device) => device.as_ref(),
            DeviceRef::Custom(_) => None,
        }
    }

    /// Name of the referenced device; `None` for the implicit host
    pub fn name(&self) -> Option<&DeviceName> {
        match self {
            DeviceRef::Standard(None) => None,
            DeviceRef::Standard(Some(device)) => Some(device.name()),
            DeviceRef::Custom(plugin) => Some(plugin.name()),
        }
    }
}

impl fmt::Debug for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceRef::Standard(None) => f.write_str("Standard(host)"),
            DeviceRef::Standard(Some(device)) => write!(f, "Standard({})", device.name()),
            DeviceRef::Custom(plugin) => write!(f, "Custom({})", plugin.name()),
        }
    }
}
