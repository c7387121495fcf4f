//! Eager execution context
//!
//! The [`Context`] owns the host CPU device, the set of local standard devices, the
//! copy executor, the execution subsystem and the runtime configuration. It is the
//! factory for tensor handles and operations.
//!
//! # Example
//!
//! ```rust
//! use eager_core::{Context, Tensor};
//!
//! # fn main() -> eager_core::Result<()> {
//! let ctx = Context::new()?;
//! let a = ctx.create_local_handle(Tensor::from_vec([2], vec![1.0f32, 2.0])?);
//! let b = ctx.create_local_handle(Tensor::from_vec([2], vec![10.0f32, 20.0])?);
//!
//! let mut add = ctx.create_operation("Add");
//! add.add_input(&a);
//! add.add_input(&b);
//!
//! let mut outputs = [None];
//! assert_eq!(add.execute(&mut outputs)?, 1);
//! let sum = outputs[0].as_ref().map(|h| h.resolve()).transpose()?;
//! assert_eq!(sum.map(|t| t.to_vec::<f32>()).transpose()?, Some(vec![11.0, 22.0]));
//! # Ok(())
//! # }
//! ```

use crate::config::ContextConfig;
use crate::device_ref::{CustomDevice, DeviceRef};
use crate::error::{Error, Result};
use crate::executor::{CopyExecutor, LocalCopyExecutor};
use crate::handle::{HandleParts, TensorHandle};
use crate::kernels::HostKernelExecutor;
use crate::operation::{ExecutionSubsystem, Operation};
use crate::remote::{RemoteTensorRef, RemoteTransport};
use crate::tensor::{DType, Shape, Tensor};
use eager_devices::{Device, DeviceKind, DeviceName, MemoryDevice};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Weak};

/// Shared, immutable context state
pub(crate) struct ContextInner {
    pub(crate) host_cpu: Arc<dyn Device>,
    devices: Vec<Arc<dyn Device>>,
    executor: Arc<dyn CopyExecutor>,
    execution: Arc<dyn ExecutionSubsystem>,
    config: ContextConfig,
}

/// Handle factory and owner of devices and executors
///
/// Cloning a context is cheap and yields another owner of the same state. Tensor
/// handles only keep a weak reference back to it.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Context with a heap-backed host CPU and default executors
    pub fn new() -> Result<Self> {
        ContextBuilder::new().build()
    }

    /// Context with default devices and the given configuration
    pub fn with_config(config: ContextConfig) -> Result<Self> {
        ContextBuilder::new().with_config(config).build()
    }

    pub(crate) fn from_inner(inner: Arc<ContextInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<ContextInner> {
        Arc::downgrade(&self.inner)
    }

    /// The host CPU device; exactly one per context
    pub fn host_cpu(&self) -> &Arc<dyn Device> {
        &self.inner.host_cpu
    }

    /// Every standard device of this context, host CPU first
    pub fn devices(&self) -> &[Arc<dyn Device>] {
        &self.inner.devices
    }

    /// Look up a standard device by name
    pub fn find_device(&self, name: &DeviceName) -> Option<&Arc<dyn Device>> {
        self.inner.devices.iter().find(|device| device.name() == name)
    }

    pub fn executor(&self) -> &Arc<dyn CopyExecutor> {
        &self.inner.executor
    }

    pub fn execution(&self) -> &Arc<dyn ExecutionSubsystem> {
        &self.inner.execution
    }

    pub fn config(&self) -> &ContextConfig {
        &self.inner.config
    }

    /// Handle for a host value, pinned to the host CPU
    pub fn create_local_handle(&self, tensor: Tensor) -> TensorHandle {
        TensorHandle::new(
            self,
            HandleParts {
                device: DeviceRef::host(),
                op_device: None,
                remote: None,
                shape: tensor.shape().clone(),
                dtype: tensor.dtype(),
                local_tensor: Some(tensor),
            },
        )
    }

    /// Place `tensor` on `device` and return a handle to it
    ///
    /// The device is also recorded as the handle's op device.
    pub fn create_handle_on_device(&self, tensor: Tensor, device: &Arc<dyn Device>) -> Result<TensorHandle> {
        let placed = tensor.to_device(device)?;
        Ok(self.wrap_on_device(placed, device))
    }

    /// Handle for a tensor already resident on (or host-compatible with) `device`
    pub(crate) fn wrap_on_device(&self, tensor: Tensor, device: &Arc<dyn Device>) -> TensorHandle {
        TensorHandle::new(
            self,
            HandleParts {
                device: DeviceRef::Standard(Some(Arc::clone(device))),
                op_device: Some(Arc::clone(device)),
                remote: None,
                shape: tensor.shape().clone(),
                dtype: tensor.dtype(),
                local_tensor: Some(tensor),
            },
        )
    }

    /// Handle for a value owned by another task
    pub fn create_remote_handle(&self, remote: RemoteTensorRef, shape: impl Into<Shape>, dtype: DType) -> TensorHandle {
        TensorHandle::new(
            self,
            HandleParts {
                device: DeviceRef::host(),
                op_device: None,
                remote: Some(remote),
                local_tensor: None,
                shape: shape.into(),
                dtype,
            },
        )
    }

    /// Handle for a value held by a custom device plugin
    ///
    /// `payload` is the plugin's own representation of the value; it is readable
    /// through [`TensorHandle::tensor`] but never treated as host-resident.
    pub fn create_custom_device_handle(&self, plugin: Arc<dyn CustomDevice>, payload: Tensor) -> TensorHandle {
        TensorHandle::new(
            self,
            HandleParts {
                device: DeviceRef::Custom(plugin),
                op_device: None,
                remote: None,
                shape: payload.shape().clone(),
                dtype: payload.dtype(),
                local_tensor: Some(payload),
            },
        )
    }

    /// Start building a single-op request; validation happens on execute
    pub fn create_operation(&self, name: impl Into<String>) -> Operation {
        Operation::new(self.downgrade(), name.into())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let devices: Vec<String> = self.inner.devices.iter().map(|d| d.name().to_string()).collect();
        f.debug_struct("Context")
            .field("host_cpu", &self.inner.host_cpu.name().to_string())
            .field("devices", &devices)
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Builder for [`Context`]
///
/// ```rust
/// use eager_core::{ContextBuilder, ContextConfig};
/// use eager_devices::MemoryDevice;
/// use std::sync::Arc;
///
/// # fn main() -> eager_core::Result<()> {
/// let ctx = ContextBuilder::new()
///     .with_config(ContextConfig::from_env())
///     .with_device(Arc::new(MemoryDevice::accelerator(0)))
///     .build()?;
/// assert_eq!(ctx.devices().len(), 2);
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct ContextBuilder {
    config: ContextConfig,
    host_cpu: Option<Arc<dyn Device>>,
    devices: Vec<Arc<dyn Device>>,
    executor: Option<Arc<dyn CopyExecutor>>,
    transport: Option<Arc<dyn RemoteTransport>>,
    execution: Option<Arc<dyn ExecutionSubsystem>>,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: ContextConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `device` as the host CPU instead of a heap-backed one
    pub fn with_host_device(mut self, device: Arc<dyn Device>) -> Self {
        self.host_cpu = Some(device);
        self
    }

    /// Register an additional standard device
    pub fn with_device(mut self, device: Arc<dyn Device>) -> Self {
        self.devices.push(device);
        self
    }

    /// Replace the default [`LocalCopyExecutor`]
    pub fn with_copy_executor(mut self, executor: Arc<dyn CopyExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Transport for the default copy executor's remote copies
    ///
    /// Ignored when a custom copy executor is installed.
    pub fn with_remote_transport(mut self, transport: Arc<dyn RemoteTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replace the default [`HostKernelExecutor`]
    pub fn with_execution_subsystem(mut self, execution: Arc<dyn ExecutionSubsystem>) -> Self {
        self.execution = Some(execution);
        self
    }

    /// Build the context
    ///
    /// # Errors
    ///
    /// Returns an error if the host device has accelerator backing or two devices
    /// share a name.
    #[tracing::instrument(skip(self), fields(devices = self.devices.len()))]
    pub fn build(self) -> Result<Context> {
        let mut config = self.config;
        let host_cpu = match self.host_cpu {
            Some(device) => {
                if device.name() != &config.host_device_name {
                    tracing::debug!(
                        configured = %config.host_device_name,
                        device = %device.name(),
                        "host_device_name_overridden"
                    );
                    config.host_device_name = device.name().clone();
                }
                device
            }
            None => Arc::new(MemoryDevice::with_name(config.host_device_name.clone(), DeviceKind::Cpu)),
        };

        if host_cpu.has_accelerator_backing() {
            return Err(Error::InvalidArgument(format!(
                "host device {} has accelerator backing",
                host_cpu.name()
            )));
        }

        let mut devices = Vec::with_capacity(self.devices.len() + 1);
        devices.push(Arc::clone(&host_cpu));
        devices.extend(self.devices);

        let mut seen = HashSet::new();
        for device in &devices {
            if !seen.insert(device.name().clone()) {
                return Err(Error::InvalidArgument(format!("duplicate device {}", device.name())));
            }
        }

        let executor = match self.executor {
            Some(executor) => executor,
            None => {
                let local = match self.transport {
                    Some(transport) => LocalCopyExecutor::with_transport(transport),
                    None => LocalCopyExecutor::new(),
                };
                Arc::new(local) as Arc<dyn CopyExecutor>
            }
        };
        let execution = self
            .execution
            .unwrap_or_else(|| Arc::new(HostKernelExecutor::with_builtins()) as Arc<dyn ExecutionSubsystem>);

        tracing::debug!(
            host = %host_cpu.name(),
            devices = devices.len(),
            implicit_mirroring = config.implicit_mirroring,
            max_custom_device_hops = config.max_custom_device_hops,
            "context_created"
        );

        Ok(Context {
            inner: Arc::new(ContextInner {
                host_cpu,
                devices,
                executor,
                execution,
                config,
            }),
        })
    }
}
