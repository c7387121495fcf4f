//! Copy executor
//!
//! The copy executor moves a handle's value onto a target standard device and
//! returns a new handle for the copy. Resolution uses it both for remote handles
//! (network copy to host) and for accelerator-resident handles (device→host copy).

use crate::context::Context;
use crate::device_ref::DeviceRef;
use crate::error::{Error, Result};
use crate::handle::TensorHandle;
use crate::remote::RemoteTransport;
use crate::tensor::Tensor;
use eager_devices::Device;
use eager_tracing::performance::{TransferDirection, TransferSpan};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Copies tensor handles between devices
///
/// Calls block until the copy completes. Implementations create the returned handle
/// through `ctx` so it shares the caller's context.
pub trait CopyExecutor: Send + Sync {
    fn copy_to_device(&self, ctx: &Context, handle: &TensorHandle, target: &Arc<dyn Device>) -> Result<TensorHandle>;
}

/// Default copy executor
///
/// Local values move through [`Device`] buffers. Remote values are fetched through
/// the configured [`RemoteTransport`] and then placed on the target.
#[derive(Default)]
pub struct LocalCopyExecutor {
    transport: Option<Arc<dyn RemoteTransport>>,
    copies_issued: AtomicU64,
}

impl LocalCopyExecutor {
    /// Executor without remote support
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transport(transport: Arc<dyn RemoteTransport>) -> Self {
        Self {
            transport: Some(transport),
            copies_issued: AtomicU64::new(0),
        }
    }

    /// Number of copies requested so far, successful or not
    pub fn copies_issued(&self) -> u64 {
        self.copies_issued.load(Ordering::Relaxed)
    }

    fn copy_tensor(&self, handle: &TensorHandle, target: &Arc<dyn Device>) -> Result<Tensor> {
        if let Some(remote) = handle.remote_ref() {
            let transport = self
                .transport
                .as_ref()
                .ok_or_else(|| Error::RemoteTransportUnavailable {
                    device: remote.device.to_string(),
                })?;

            let mut span = TransferSpan::new(TransferDirection::Remote, 0, remote.device.to_string());
            let fetched = transport.fetch_tensor(remote).inspect_err(|_| span.fail())?;
            span.set_bytes(fetched.size_in_bytes());
            drop(span);
            return fetched.to_device(target);
        }

        match handle.device() {
            DeviceRef::Custom(plugin) => Err(Error::custom_device(
                plugin.name().to_string(),
                "custom device values are copied by their plugin",
            )),
            DeviceRef::Standard(_) => handle.tensor()?.to_device(target),
        }
    }
}

impl CopyExecutor for LocalCopyExecutor {
    #[tracing::instrument(skip(self, ctx, handle, target), fields(
        handle = handle.id(),
        remote = handle.is_remote(),
        dst = %target.name()
    ))]
    fn copy_to_device(&self, ctx: &Context, handle: &TensorHandle, target: &Arc<dyn Device>) -> Result<TensorHandle> {
        self.copies_issued.fetch_add(1, Ordering::Relaxed);
        match self.copy_tensor(handle, target) {
            Ok(tensor) => Ok(ctx.wrap_on_device(tensor, target)),
            Err(err) => {
                tracing::warn!(handle = handle.id(), dst = %target.name(), error = %err, "tensor_copy_failed");
                Err(Error::CopyFailed {
                    target: target.name().to_string(),
                    source: Box::new(err),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextBuilder;
    use crate::remote::{LoopbackTransport, RemoteTensorRef};
    use crate::tensor::DType;
    use eager_devices::{DeviceName, MemoryDevice};

    #[test]
    fn test_host_to_accelerator_and_back() {
        let gpu: Arc<dyn Device> = Arc::new(MemoryDevice::accelerator(0));
        let executor = Arc::new(LocalCopyExecutor::new());
        let ctx = ContextBuilder::new()
            .with_device(gpu.clone())
            .with_copy_executor(executor.clone())
            .build()
            .unwrap();

        let host = ctx.create_local_handle(Tensor::from_vec([2], vec![1.0f32, 2.0]).unwrap());
        let on_gpu = host.copy_to_device(&gpu).unwrap();
        assert_eq!(on_gpu.backing_device_name(), *gpu.name());
        assert!(!on_gpu.tensor().unwrap().is_host());

        let back = on_gpu.copy_to_device(ctx.host_cpu()).unwrap();
        assert_eq!(back.tensor().unwrap().to_vec::<f32>().unwrap(), vec![1.0, 2.0]);
        assert_eq!(executor.copies_issued(), 2);
    }

    #[test]
    fn test_remote_without_transport() {
        let ctx = Context::new().unwrap();
        let device: DeviceName = "/job:worker/replica:0/task:0/device:CPU:0".parse().unwrap();
        let handle = ctx.create_remote_handle(RemoteTensorRef::new(device, 1, 0), [1], DType::F32);

        let err = handle.copy_to_device(ctx.host_cpu()).unwrap_err();
        match err {
            Error::CopyFailed { source, .. } => {
                assert!(matches!(*source, Error::RemoteTransportUnavailable { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_remote_fetch_through_transport() {
        let transport = Arc::new(LoopbackTransport::new());
        let ctx = ContextBuilder::new()
            .with_remote_transport(transport.clone())
            .build()
            .unwrap();
        let device: DeviceName = "/job:worker/replica:0/task:2/device:GPU:0".parse().unwrap();
        let remote = RemoteTensorRef::new(device, 9, 0);
        transport.publish(remote.clone(), Tensor::from_vec([2], vec![7i64, 8]).unwrap());

        let handle = ctx.create_remote_handle(remote, [2], DType::I64);
        let copy = handle.copy_to_device(ctx.host_cpu()).unwrap();
        assert!(!copy.is_remote());
        assert_eq!(copy.tensor().unwrap().to_vec::<i64>().unwrap(), vec![7, 8]);
        assert_eq!(transport.fetch_count(), 1);
    }
}
