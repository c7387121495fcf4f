//! Tensor handles and host resolution
//!
//! A [`TensorHandle`] refers to a tensor value that may live on the host CPU, on a
//! local accelerator, on another task, or behind a custom device plugin.
//! [`TensorHandle::resolve`] turns any of these into a host-addressable [`Tensor`]:
//!
//! ```text
//!                    resolve()
//!                        │
//!        ┌───────────────┼────────────────────┐
//!        ▼               ▼                    ▼
//!   custom device      remote               local
//!   plugin copy to     executor copy        mirror? ─────────▶ alias mirror
//!   host, repeat       to host, read,       effectively CPU? ─▶ alias tensor
//!   until standard,    deep copy,           else executor copy to host,
//!   then resolve       drop temp handle     fill mirror if allowed
//! ```
//!
//! Handles are cheap to clone; a clone is another owner of the same handle. Every
//! handle keeps a non-owning reference to the context that created it.

use crate::context::{Context, ContextInner};
use crate::device_ref::{CustomDevice, DeviceRef};
use crate::error::{Error, Result};
use crate::instrumentation::{ResolveMetrics, ResolvePath};
use crate::mirror::LocalMirror;
use crate::remote::RemoteTensorRef;
use crate::tensor::{DType, Shape, Tensor};
use eager_devices::{Device, DeviceName};
use eager_tracing::performance::{TransferDirection, TransferSpan};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Reference-counted handle to a possibly non-local tensor value
#[derive(Clone)]
pub struct TensorHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    id: u64,
    device: DeviceRef,
    op_device: Option<Arc<dyn Device>>,
    remote: Option<RemoteTensorRef>,
    local_tensor: Option<Tensor>,
    local_mirror: LocalMirror,
    implicit_mirroring: AtomicBool,
    shape: Shape,
    dtype: DType,
    ctx: Weak<ContextInner>,
}

/// Construction parameters; only the context builds handles
pub(crate) struct HandleParts {
    pub device: DeviceRef,
    pub op_device: Option<Arc<dyn Device>>,
    pub remote: Option<RemoteTensorRef>,
    pub local_tensor: Option<Tensor>,
    pub shape: Shape,
    pub dtype: DType,
}

impl TensorHandle {
    pub(crate) fn new(ctx: &Context, parts: HandleParts) -> Self {
        let id = NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            handle = id,
            device = ?parts.device,
            remote = parts.remote.is_some(),
            shape = %parts.shape,
            dtype = %parts.dtype,
            "tensor_handle_created"
        );
        Self {
            inner: Arc::new(HandleInner {
                id,
                device: parts.device,
                op_device: parts.op_device,
                remote: parts.remote,
                local_tensor: parts.local_tensor,
                local_mirror: LocalMirror::new(),
                implicit_mirroring: AtomicBool::new(ctx.config().implicit_mirroring),
                shape: parts.shape,
                dtype: parts.dtype,
                ctx: ctx.downgrade(),
            }),
        }
    }

    /// Process-unique handle id
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Where this handle's memory lives
    pub fn device(&self) -> &DeviceRef {
        &self.inner.device
    }

    /// Device the producing op ran on, if any
    pub fn op_device(&self) -> Option<&Arc<dyn Device>> {
        self.inner.op_device.as_ref()
    }

    /// Name of the device the producing op ran on, falling back to the host CPU
    pub fn device_name(&self) -> DeviceName {
        match &self.inner.op_device {
            Some(device) => device.name().clone(),
            None => self.host_name(),
        }
    }

    /// Name of the device holding this handle's memory
    pub fn backing_device_name(&self) -> DeviceName {
        if let Some(remote) = &self.inner.remote {
            return remote.device.clone();
        }
        match self.inner.device.name() {
            Some(name) => name.clone(),
            None => self.host_name(),
        }
    }

    fn host_name(&self) -> DeviceName {
        match self.inner.ctx.upgrade() {
            Some(ctx) => ctx.host_cpu.name().clone(),
            None => DeviceName::host_cpu(),
        }
    }

    pub fn is_remote(&self) -> bool {
        self.inner.remote.is_some()
    }

    pub fn remote_ref(&self) -> Option<&RemoteTensorRef> {
        self.inner.remote.as_ref()
    }

    pub fn shape(&self) -> &Shape {
        &self.inner.shape
    }

    pub fn dtype(&self) -> DType {
        self.inner.dtype
    }

    pub fn num_dims(&self) -> usize {
        self.inner.shape.rank()
    }

    pub fn num_elements(&self) -> usize {
        self.inner.shape.num_elements()
    }

    /// Number of live owners of this handle
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// True when both values are owners of the same handle
    pub fn same_handle(&self, other: &TensorHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn implicit_mirroring(&self) -> bool {
        self.inner.implicit_mirroring.load(Ordering::Relaxed)
    }

    /// Allow or forbid caching of future device→host copies
    pub fn set_implicit_mirroring(&self, enabled: bool) {
        self.inner.implicit_mirroring.store(enabled, Ordering::Relaxed);
    }

    /// Borrow the local tensor
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotLocal`] for remote handles and custom handles without a
    /// payload.
    pub fn tensor(&self) -> Result<&Tensor> {
        if self.is_remote() {
            return Err(Error::NotLocal {
                handle: self.inner.id,
                reason: "remote",
            });
        }
        self.inner.local_tensor.as_ref().ok_or(Error::NotLocal {
            handle: self.inner.id,
            reason: "no local tensor",
        })
    }

    /// Borrow the host mirror
    pub fn tensor_from_host_mirror(&self) -> Result<&Tensor> {
        self.inner
            .local_mirror
            .get()
            .ok_or(Error::NoLocalMirror { handle: self.inner.id })
    }

    pub fn has_local_mirror(&self) -> bool {
        self.inner.local_mirror.is_filled()
    }

    /// The context that created this handle
    ///
    /// # Errors
    ///
    /// Returns [`Error::ContextDropped`] once the context is gone.
    pub fn context(&self) -> Result<Context> {
        self.inner
            .ctx
            .upgrade()
            .map(Context::from_inner)
            .ok_or(Error::ContextDropped)
    }

    /// Copy this handle's value to `target` through the context's copy executor
    #[tracing::instrument(skip(self, target), fields(handle = self.inner.id, dst = %target.name()))]
    pub fn copy_to_device(&self, target: &Arc<dyn Device>) -> Result<TensorHandle> {
        let ctx = self.context()?;
        ctx.executor().copy_to_device(&ctx, self, target)
    }

    /// Produce a host-addressable value for this handle
    ///
    /// Local host-resident values and filled mirrors are returned aliased, without a
    /// copy. Everything else goes through a copy, which is cached in the local mirror
    /// when the handle allows implicit mirroring and the value was local.
    ///
    /// # Errors
    ///
    /// Any copy or read failure is returned as-is; no partial value is produced and
    /// nothing is retried.
    pub fn resolve(&self) -> Result<Tensor> {
        self.resolve_with_metrics().map(|(tensor, _)| tensor)
    }

    /// [`Self::resolve`], also returning what the resolution did
    #[tracing::instrument(skip(self), fields(handle = self.inner.id, device = ?self.inner.device))]
    pub fn resolve_with_metrics(&self) -> Result<(Tensor, ResolveMetrics)> {
        let span = eager_tracing::perf_span!("resolve", handle = self.inner.id);
        let result = match &self.inner.device {
            DeviceRef::Custom(plugin) => self.resolve_custom(plugin),
            DeviceRef::Standard(_) if self.is_remote() => self.resolve_remote(),
            DeviceRef::Standard(_) => self.resolve_local(),
        };

        match result {
            Ok((tensor, path)) => {
                let metrics = ResolveMetrics::new(self.inner.id, path, tensor.size_in_bytes(), span.elapsed_us());
                metrics.log();
                Ok((tensor, metrics))
            }
            Err(err) => {
                tracing::debug!(handle = self.inner.id, error = %err, "resolve_failed");
                Err(err)
            }
        }
    }

    fn resolve_custom(&self, plugin: &Arc<dyn CustomDevice>) -> Result<(Tensor, ResolvePath)> {
        let ctx = self.context()?;
        let host = ctx.host_cpu().name().clone();
        let limit = ctx.config().max_custom_device_hops;

        let mut plugin = Arc::clone(plugin);
        // Intermediate handles are owned here and released when replaced or on return
        let mut current: Option<TensorHandle> = None;
        for hop in 1..=limit {
            let source = current.as_ref().unwrap_or(self);
            let copy = copy_from_custom_device(&plugin, source, &host)?;
            let next = match copy.device() {
                DeviceRef::Custom(next) => Arc::clone(next),
                DeviceRef::Standard(_) => {
                    let (tensor, _) = copy.resolve_with_metrics()?;
                    return Ok((tensor, ResolvePath::CustomDevice { hops: hop }));
                }
            };
            tracing::trace!(handle = self.inner.id, hop, next = %next.name(), "custom_device_chained");
            plugin = next;
            current = Some(copy);
        }

        tracing::warn!(handle = self.inner.id, limit, device = %plugin.name(), "custom_device_hop_limit");
        Err(Error::CustomDeviceHopLimit {
            limit,
            device: plugin.name().to_string(),
        })
    }

    fn resolve_remote(&self) -> Result<(Tensor, ResolvePath)> {
        let ctx = self.context()?;
        let copy = ctx.executor().copy_to_device(&ctx, self, ctx.host_cpu())?;
        let tensor = copy.tensor()?.deep_copy()?;
        Ok((tensor, ResolvePath::Remote))
    }

    fn resolve_local(&self) -> Result<(Tensor, ResolvePath)> {
        if let Some(mirror) = self.inner.local_mirror.get() {
            return Ok((mirror.clone(), ResolvePath::Mirror));
        }

        if self.inner.device.is_effectively_cpu() {
            let tensor = self.tensor()?;
            if !tensor.is_host() {
                return Err(Error::ReadFailed(format!(
                    "handle {} is on a host device but its tensor is not in host memory",
                    self.inner.id
                )));
            }
            return Ok((tensor.clone(), ResolvePath::HostResident));
        }

        let ctx = self.context()?;
        let copy = ctx.executor().copy_to_device(&ctx, self, ctx.host_cpu())?;
        let tensor = copy.tensor()?;
        if !tensor.is_host() {
            return Err(Error::ReadFailed(format!(
                "copy of handle {} to {} is not in host memory",
                self.inner.id,
                ctx.host_cpu().name()
            )));
        }

        if self.implicit_mirroring() {
            let mirrored = self.inner.local_mirror.fill(tensor.clone());
            Ok((mirrored.clone(), ResolvePath::DeviceCopy { mirrored: true }))
        } else {
            Ok((tensor.clone(), ResolvePath::DeviceCopy { mirrored: false }))
        }
    }
}

fn copy_from_custom_device(
    plugin: &Arc<dyn CustomDevice>,
    source: &TensorHandle,
    host: &DeviceName,
) -> Result<TensorHandle> {
    let bytes = source.inner.local_tensor.as_ref().map_or(0, Tensor::size_in_bytes);
    let mut span = TransferSpan::new(TransferDirection::CustomDevice, bytes, plugin.name().to_string());
    plugin.copy_tensor_from_device(source, host).inspect_err(|err| {
        span.fail();
        tracing::debug!(handle = source.inner.id, device = %plugin.name(), error = %err, "custom_device_copy_failed");
    })
}

impl fmt::Debug for TensorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TensorHandle")
            .field("id", &self.inner.id)
            .field("device", &self.inner.device)
            .field("remote", &self.inner.remote)
            .field("shape", &self.inner.shape)
            .field("dtype", &self.inner.dtype)
            .field("mirrored", &self.has_local_mirror())
            .finish()
    }
}
