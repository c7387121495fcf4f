//! # eager-core - Tensor handles for eager execution
//!
//! A tensor handle refers to a value that may live on the host CPU, a local
//! accelerator, a remote task or a custom device plugin. This crate resolves any
//! such handle to a host-addressable [`Tensor`] through one synchronous call, and
//! dispatches single operations whose outputs are new handles.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ Context: host CPU, devices, copy executor, execution     │
//! └───────┬──────────────────────────────┬───────────────────┘
//!         │ create_*_handle              │ create_operation
//!         ▼                              ▼
//! ┌──────────────────┐  inputs   ┌──────────────────┐
//! │  TensorHandle    │◀──────────│    Operation     │
//! │  DeviceRef       │           │  execute(slots)  │
//! │  LocalMirror     │──────────▶│                  │
//! │  resolve()       │  outputs  └──────────────────┘
//! └──────────────────┘
//!   │ plugin copy     │ executor copy (remote / device→host)
//!   ▼                 ▼
//! CustomDevice     CopyExecutor ──▶ RemoteTransport
//! ```
//!
//! ## Example
//!
//! ```rust
//! use eager_core::{ContextBuilder, Tensor};
//! use eager_devices::{Device, MemoryDevice};
//! use std::sync::Arc;
//!
//! # fn main() -> eager_core::Result<()> {
//! let gpu: Arc<dyn Device> = Arc::new(MemoryDevice::accelerator(0));
//! let ctx = ContextBuilder::new().with_device(gpu.clone()).build()?;
//!
//! let handle = ctx.create_handle_on_device(Tensor::from_vec([3], vec![1.0f32, 2.0, 3.0])?, &gpu)?;
//! let value = handle.resolve()?; // device→host copy, cached in the mirror
//! assert_eq!(value.to_vec::<f32>()?, vec![1.0, 2.0, 3.0]);
//! assert!(handle.has_local_mirror());
//! # Ok(())
//! # }
//! ```
//!
//! ## Logging
//!
//! Every resolution, copy and execution emits `tracing` events. Install a subscriber
//! with `eager_tracing::init_global_tracing` to see them.

pub mod config;
pub mod context;
pub mod device_ref;
pub mod error;
pub mod executor;
pub mod handle;
pub mod instrumentation;
pub mod kernels;
pub mod mirror;
pub mod operation;
pub mod remote;
pub mod tensor;

pub use config::{ContextConfig, DEFAULT_MAX_CUSTOM_DEVICE_HOPS};
pub use context::{Context, ContextBuilder};
pub use device_ref::{CustomDevice, DeviceRef};
pub use error::{Error, Result};
pub use executor::{CopyExecutor, LocalCopyExecutor};
pub use handle::TensorHandle;
pub use instrumentation::{ResolveMetrics, ResolvePath};
pub use kernels::{HostKernel, HostKernelExecutor, KernelRegistry};
pub use mirror::LocalMirror;
pub use operation::{AttrValue, ExecutionSubsystem, Operation};
pub use remote::{LoopbackTransport, RemoteTensorRef, RemoteTransport};
pub use tensor::{DType, Element, Shape, Tensor};
