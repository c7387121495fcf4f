//! Single-operation dispatch
//!
//! An [`Operation`] collects an op name, input handles, attributes and an optional
//! device request, then hands itself to the context's [`ExecutionSubsystem`].

use crate::context::{Context, ContextInner};
use crate::error::{Error, Result};
use crate::handle::TensorHandle;
use crate::tensor::{DType, Shape};
use eager_devices::DeviceName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Weak;

/// Executes single operations on behalf of a context
///
/// `retvals` is caller-provided output storage. On success the implementation
/// returns how many leading slots it filled; slots past that count must not be read.
/// On failure after writing outputs, return [`Error::partial_execution`] so callers
/// can still tell how many slots are valid.
pub trait ExecutionSubsystem: Send + Sync {
    fn execute_operation(&self, op: &Operation, retvals: &mut [Option<TensorHandle>]) -> Result<usize>;
}

/// Operation attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    DType(DType),
    Shape(Shape),
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Float(value)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::String(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::String(value)
    }
}

impl From<DType> for AttrValue {
    fn from(value: DType) -> Self {
        AttrValue::DType(value)
    }
}

impl From<Shape> for AttrValue {
    fn from(value: Shape) -> Self {
        AttrValue::Shape(value)
    }
}

/// A pending single-op request bound to a context
///
/// The operation does not keep its context alive; executing after the context is
/// gone fails with [`Error::ContextDropped`].
pub struct Operation {
    ctx: Weak<ContextInner>,
    name: String,
    inputs: Vec<TensorHandle>,
    attrs: BTreeMap<String, AttrValue>,
    device: Option<DeviceName>,
}

impl Operation {
    pub(crate) fn new(ctx: Weak<ContextInner>, name: String) -> Self {
        Self {
            ctx,
            name,
            inputs: Vec::new(),
            attrs: BTreeMap::new(),
            device: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The context that created this operation
    ///
    /// # Errors
    ///
    /// Returns [`Error::ContextDropped`] if the context no longer exists.
    pub fn context(&self) -> Result<Context> {
        self.ctx.upgrade().map(Context::from_inner).ok_or(Error::ContextDropped)
    }

    /// Append an input; the operation keeps its own owner of the handle
    pub fn add_input(&mut self, handle: &TensorHandle) {
        self.inputs.push(handle.clone());
    }

    pub fn inputs(&self) -> &[TensorHandle] {
        &self.inputs
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<AttrValue>) {
        self.attrs.insert(name.into(), value.into());
    }

    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attrs.get(name)
    }

    pub fn attrs(&self) -> &BTreeMap<String, AttrValue> {
        &self.attrs
    }

    /// Request execution on the named device
    pub fn set_device(&mut self, name: &str) -> Result<()> {
        self.device = Some(name.parse()?);
        Ok(())
    }

    pub fn device(&self) -> Option<&DeviceName> {
        self.device.as_ref()
    }

    /// Run the operation, writing outputs into `retvals`
    ///
    /// Returns the number of leading slots filled. Errors from the execution
    /// subsystem come back as [`Error::Execution`], carrying the filled count.
    #[tracing::instrument(skip(self, retvals), fields(op = %self.name, inputs = self.inputs.len(), slots = retvals.len()))]
    pub fn execute(&self, retvals: &mut [Option<TensorHandle>]) -> Result<usize> {
        let ctx = self.context()?;
        let capacity = retvals.len();
        let span = eager_tracing::perf_span!("execute", op = self.name.as_str());

        let result = ctx.execution().execute_operation(self, retvals);
        let duration_us = span.elapsed_us();

        match result {
            Ok(filled) if filled > capacity => Err(self.overflow(filled, capacity)),
            Ok(filled) => {
                tracing::debug!(op = %self.name, filled, duration_us, "operation_executed");
                Ok(filled)
            }
            Err(Error::Execution { filled, .. }) if filled > capacity => Err(self.overflow(filled, capacity)),
            Err(err @ Error::Execution { .. }) => {
                tracing::debug!(op = %self.name, error = %err, duration_us, "operation_failed");
                Err(err)
            }
            Err(err) => {
                tracing::debug!(op = %self.name, error = %err, duration_us, "operation_failed");
                Err(Error::partial_execution(self.name.clone(), 0, err))
            }
        }
    }

    fn overflow(&self, reported: usize, capacity: usize) -> Error {
        tracing::warn!(op = %self.name, reported, capacity, "execution_output_overflow");
        Error::InvalidOutputCount {
            op: self.name.clone(),
            reported,
            capacity,
        }
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inputs: Vec<u64> = self.inputs.iter().map(TensorHandle::id).collect();
        f.debug_struct("Operation")
            .field("name", &self.name)
            .field("inputs", &inputs)
            .field("attrs", &self.attrs)
            .field("device", &self.device)
            .finish()
    }
}
