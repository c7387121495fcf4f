//! Remote tensor references and the transport seam
//!
//! A remote handle's canonical value is owned by another task. The handle carries a
//! [`RemoteTensorRef`] naming the producing op output; the copy executor hands it to
//! a [`RemoteTransport`] to fetch the bytes.

use crate::error::{Error, Result};
use crate::tensor::Tensor;
use eager_devices::DeviceName;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies one output of an op executed on a remote task
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteTensorRef {
    /// Device on the remote task holding the value
    pub device: DeviceName,
    /// Id of the producing op on that task
    pub op_id: u64,
    /// Output index of the producing op
    pub output_num: u32,
}

impl RemoteTensorRef {
    pub fn new(device: DeviceName, op_id: u64, output_num: u32) -> Self {
        Self {
            device,
            op_id,
            output_num,
        }
    }

    /// The owning task, `/job:J/replica:R/task:T`
    pub fn task(&self) -> String {
        format!(
            "/job:{}/replica:{}/task:{}",
            self.device.job, self.device.replica, self.device.task
        )
    }
}

impl fmt::Display for RemoteTensorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#op{}:{}", self.device, self.op_id, self.output_num)
    }
}

/// Network seam used to pull remote tensors into this process
///
/// Calls block until the tensor arrives or the transport gives up; timeouts and
/// cancellation are the transport's concern.
pub trait RemoteTransport: Send + Sync {
    fn fetch_tensor(&self, remote: &RemoteTensorRef) -> Result<Tensor>;
}

/// In-process transport serving tensors published under remote references
///
/// Useful for single-process deployments and tests that simulate remote tasks.
#[derive(Default)]
pub struct LoopbackTransport {
    tensors: RwLock<HashMap<RemoteTensorRef, Tensor>>,
    fetches: AtomicU64,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `tensor` available under `remote`, replacing any previous value
    pub fn publish(&self, remote: RemoteTensorRef, tensor: Tensor) {
        tracing::debug!(remote = %remote, bytes = tensor.size_in_bytes(), "remote_tensor_published");
        self.tensors.write().insert(remote, tensor);
    }

    /// Number of fetches served or attempted
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}

impl RemoteTransport for LoopbackTransport {
    fn fetch_tensor(&self, remote: &RemoteTensorRef) -> Result<Tensor> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.tensors
            .read()
            .get(remote)
            .cloned()
            .ok_or_else(|| Error::Transport(format!("nothing published for {remote}")))
    }
}
