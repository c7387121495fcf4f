//! Host kernel registry and the default execution subsystem
//!
//! [`HostKernelExecutor`] resolves every input to host memory, runs the kernel
//! registered under the op name, and returns outputs as handles. When the op requests
//! a device known to the context, outputs are placed on that device.
//!
//! Builtin kernels (f32, elementwise, equal shapes): `Identity`, `Add`, `Mul`.
//! `Identity` accepts any dtype.

use crate::error::{Error, Result};
use crate::handle::TensorHandle;
use crate::operation::{ExecutionSubsystem, Operation};
use crate::tensor::{DType, Tensor};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// A host kernel: resolved inputs in, host outputs out
pub type HostKernel = Arc<dyn Fn(&Operation, &[Tensor]) -> Result<Vec<Tensor>> + Send + Sync>;

/// Op name → host kernel
#[derive(Default)]
pub struct KernelRegistry {
    kernels: RwLock<HashMap<String, HostKernel>>,
}

impl KernelRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the builtin kernels
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register("Identity", identity);
        registry.register("Add", |op, inputs| binary_f32(op, inputs, |a, b| a + b));
        registry.register("Mul", |op, inputs| binary_f32(op, inputs, |a, b| a * b));
        registry
    }

    /// Register `kernel` under `name`, replacing any previous kernel
    pub fn register<F>(&self, name: impl Into<String>, kernel: F)
    where
        F: Fn(&Operation, &[Tensor]) -> Result<Vec<Tensor>> + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::trace!(kernel = %name, "kernel_registered");
        self.kernels.write().insert(name, Arc::new(kernel));
    }

    pub fn get(&self, name: &str) -> Option<HostKernel> {
        self.kernels.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.kernels.read().contains_key(name)
    }

    /// Registered op names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.kernels.read().keys().cloned().collect();
        names.sort();
        names
    }
}

/// Default [`ExecutionSubsystem`] running kernels on the host
#[derive(Default)]
pub struct HostKernelExecutor {
    registry: KernelRegistry,
}

impl HostKernelExecutor {
    pub fn new(registry: KernelRegistry) -> Self {
        Self { registry }
    }

    pub fn with_builtins() -> Self {
        Self::new(KernelRegistry::with_builtins())
    }

    pub fn registry(&self) -> &KernelRegistry {
        &self.registry
    }
}

impl ExecutionSubsystem for HostKernelExecutor {
    fn execute_operation(&self, op: &Operation, retvals: &mut [Option<TensorHandle>]) -> Result<usize> {
        let kernel = self
            .registry
            .get(op.name())
            .ok_or_else(|| Error::KernelNotFound(op.name().to_string()))?;

        let ctx = op.context()?;
        let target = match op.device() {
            Some(name) => Some(
                ctx.find_device(name)
                    .cloned()
                    .ok_or_else(|| Error::UnknownDevice(name.to_string()))?,
            ),
            None => None,
        };

        let inputs = op
            .inputs()
            .iter()
            .map(TensorHandle::resolve)
            .collect::<Result<Vec<_>>>()?;
        let (outputs, kernel_us) = eager_tracing::timed_block!(op.name(), { kernel(op, &inputs) });
        let outputs = outputs?;
        tracing::trace!(op = %op.name(), kernel_us, outputs = outputs.len(), "host_kernel_ran");

        if outputs.len() > retvals.len() {
            return Err(Error::InvalidOutputCount {
                op: op.name().to_string(),
                reported: outputs.len(),
                capacity: retvals.len(),
            });
        }

        let mut filled = 0;
        for (slot, tensor) in retvals.iter_mut().zip(outputs) {
            let handle = match &target {
                Some(device) => ctx
                    .create_handle_on_device(tensor, device)
                    .map_err(|err| Error::partial_execution(op.name(), filled, err))?,
                None => ctx.create_local_handle(tensor),
            };
            *slot = Some(handle);
            filled += 1;
        }
        Ok(filled)
    }
}

fn identity(_op: &Operation, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
    match inputs {
        [input] => Ok(vec![input.clone()]),
        _ => Err(Error::InvalidArgument(format!("Identity takes 1 input, got {}", inputs.len()))),
    }
}

fn binary_f32(op: &Operation, inputs: &[Tensor], f: impl Fn(f32, f32) -> f32) -> Result<Vec<Tensor>> {
    let [a, b] = inputs else {
        return Err(Error::InvalidArgument(format!(
            "{} takes 2 inputs, got {}",
            op.name(),
            inputs.len()
        )));
    };
    for input in [a, b] {
        if input.dtype() != DType::F32 {
            return Err(Error::TypeMismatch {
                expected: DType::F32,
                actual: input.dtype(),
            });
        }
    }
    if a.shape() != b.shape() {
        return Err(Error::ShapeMismatch {
            expected: a.shape().dims().to_vec(),
            actual: b.shape().dims().to_vec(),
        });
    }

    let lhs = a.to_vec::<f32>()?;
    let rhs = b.to_vec::<f32>()?;
    let out: Vec<f32> = lhs.iter().zip(&rhs).map(|(&x, &y)| f(x, y)).collect();
    Ok(vec![Tensor::from_vec(a.shape().clone(), out)?])
}
