//! Tensor values
//!
//! A [`Tensor`] is an immutable, reference-counted value with a shape, an element
//! type and storage that lives either in host memory or in a standard device buffer.
//! Cloning a tensor aliases its storage; [`Tensor::deep_copy`] produces an
//! independent host copy.
//!
//! # Examples
//!
//! ```rust
//! use eager_core::Tensor;
//!
//! # fn main() -> eager_core::Result<()> {
//! let t = Tensor::from_vec([3], vec![1.0f32, 2.0, 3.0])?;
//! assert_eq!(t.shape().dims(), &[3]);
//! assert_eq!(t.to_vec::<f32>()?, vec![1.0, 2.0, 3.0]);
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use eager_devices::{BufferHandle, Device, DeviceName};
use eager_tracing::performance::{TransferDirection, TransferSpan};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Element type of a tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    F32,
    F64,
    I32,
    I64,
    U8,
    Bool,
}

impl DType {
    /// Size of one element in bytes
    pub const fn size_in_bytes(self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::F64 | DType::I64 => 8,
            DType::U8 | DType::Bool => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DType::F32 => "float32",
            DType::F64 => "float64",
            DType::I32 => "int32",
            DType::I64 => "int64",
            DType::U8 => "uint8",
            DType::Bool => "bool",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rust scalar types that can back a tensor
///
/// `T` must be `bytemuck::Pod` so tensor bytes can be reinterpreted without copies
/// of individual elements.
pub trait Element: bytemuck::Pod {
    const DTYPE: DType;
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;
}

impl Element for f64 {
    const DTYPE: DType = DType::F64;
}

impl Element for i32 {
    const DTYPE: DType = DType::I32;
}

impl Element for i64 {
    const DTYPE: DType = DType::I64;
}

impl Element for u8 {
    const DTYPE: DType = DType::U8;
}

/// Tensor dimensions, row-major
#[derive(Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Shape(Vec<usize>);

impl Shape {
    pub fn new(dims: Vec<usize>) -> Self {
        Self(dims)
    }

    /// Rank-0 shape
    pub fn scalar() -> Self {
        Self(Vec::new())
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Number of dimensions
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Product of all dimensions (1 for a scalar), saturating at `usize::MAX`
    pub fn num_elements(&self) -> usize {
        self.checked_num_elements().unwrap_or(usize::MAX)
    }

    /// Product of all dimensions, `None` on overflow
    pub fn checked_num_elements(&self) -> Option<usize> {
        self.0.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
    }

    /// Byte size of a `dtype` tensor with this shape, `None` on overflow
    pub fn checked_size_in_bytes(&self, dtype: DType) -> Option<usize> {
        self.checked_num_elements()?.checked_mul(dtype.size_in_bytes())
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Self(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Self(dims.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Self(dims.to_vec())
    }
}

/// A buffer owned by a standard device, freed when the last tensor referencing it drops
struct DeviceAllocation {
    device: Arc<dyn Device>,
    buffer: BufferHandle,
    len: usize,
}

impl Drop for DeviceAllocation {
    fn drop(&mut self) {
        if let Err(err) = self.device.free_buffer(self.buffer) {
            tracing::warn!(device = %self.device.name(), buffer = %self.buffer, error = %err, "device_buffer_free_failed");
        }
    }
}

#[derive(Clone)]
enum Storage {
    Host(Arc<[u8]>),
    Device(Arc<DeviceAllocation>),
}

/// Immutable tensor value
#[derive(Clone)]
pub struct Tensor {
    shape: Shape,
    dtype: DType,
    storage: Storage,
}

impl Tensor {
    /// Create a host tensor from typed elements
    ///
    /// # Errors
    ///
    /// Returns an error if `data.len()` does not match the shape's element count.
    pub fn from_vec<T: Element>(shape: impl Into<Shape>, data: Vec<T>) -> Result<Self> {
        let shape = shape.into();
        let expected = shape
            .checked_num_elements()
            .ok_or_else(|| Error::InvalidArgument(format!("element count of shape {shape} overflows")))?;
        if data.len() != expected {
            return Err(Error::InvalidArgument(format!(
                "shape {shape} needs {expected} elements, got {}",
                data.len()
            )));
        }
        Ok(Self {
            shape,
            dtype: T::DTYPE,
            storage: Storage::Host(Arc::from(bytemuck::cast_slice::<T, u8>(&data))),
        })
    }

    /// Create a rank-0 host tensor
    pub fn scalar<T: Element>(value: T) -> Self {
        Self {
            shape: Shape::scalar(),
            dtype: T::DTYPE,
            storage: Storage::Host(Arc::from(bytemuck::bytes_of(&value))),
        }
    }

    /// Create a host tensor from raw little-endian bytes
    ///
    /// # Errors
    ///
    /// Returns an error if the byte count does not match shape and dtype.
    pub fn from_bytes(shape: impl Into<Shape>, dtype: DType, bytes: Vec<u8>) -> Result<Self> {
        let shape = shape.into();
        let expected = shape
            .checked_size_in_bytes(dtype)
            .ok_or_else(|| Error::InvalidArgument(format!("byte size of {dtype} tensor of shape {shape} overflows")))?;
        if bytes.len() != expected {
            return Err(Error::InvalidArgument(format!(
                "{dtype} tensor of shape {shape} needs {expected} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self {
            shape,
            dtype,
            storage: Storage::Host(Arc::from(bytes)),
        })
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn num_elements(&self) -> usize {
        self.shape.num_elements()
    }

    /// Total payload size in bytes
    pub fn size_in_bytes(&self) -> usize {
        self.num_elements() * self.dtype.size_in_bytes()
    }

    /// True when the bytes live in host memory
    pub fn is_host(&self) -> bool {
        matches!(self.storage, Storage::Host(_))
    }

    /// Device holding the bytes, `None` for host storage
    pub fn device_name(&self) -> Option<&DeviceName> {
        match &self.storage {
            Storage::Host(_) => None,
            Storage::Device(alloc) => Some(alloc.device.name()),
        }
    }

    /// Device buffer backing this tensor, `None` for host storage
    pub fn device_buffer(&self) -> Option<BufferHandle> {
        match &self.storage {
            Storage::Host(_) => None,
            Storage::Device(alloc) => Some(alloc.buffer),
        }
    }

    /// Borrow the host bytes
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReadFailed`] when the tensor lives in a device buffer.
    pub fn host_bytes(&self) -> Result<&[u8]> {
        match &self.storage {
            Storage::Host(bytes) => Ok(&bytes[..]),
            Storage::Device(alloc) => Err(Error::ReadFailed(format!(
                "tensor lives in {} on {}, not host memory",
                alloc.buffer,
                alloc.device.name()
            ))),
        }
    }

    /// Copy the host elements out as `Vec<T>`
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if T::DTYPE != self.dtype {
            return Err(Error::TypeMismatch {
                expected: self.dtype,
                actual: T::DTYPE,
            });
        }
        let bytes = self.host_bytes()?;
        // Zeroed Vec<T> keeps the destination aligned for T
        let mut out = vec![T::zeroed(); self.num_elements()];
        bytemuck::cast_slice_mut::<T, u8>(&mut out).copy_from_slice(bytes);
        Ok(out)
    }

    /// Host-resident version of this tensor
    ///
    /// Host tensors are returned aliased; device tensors are read back (D2H).
    pub fn to_host(&self) -> Result<Tensor> {
        let alloc = match &self.storage {
            Storage::Host(_) => return Ok(self.clone()),
            Storage::Device(alloc) => alloc,
        };

        let mut span = TransferSpan::new(TransferDirection::DeviceToHost, alloc.len, alloc.device.name().to_string());
        let mut bytes = vec![0u8; alloc.len];
        if let Err(err) = alloc.device.copy_from_buffer(alloc.buffer, &mut bytes) {
            span.fail();
            return Err(Error::ReadFailed(format!("reading {} from {}: {err}", alloc.buffer, alloc.device.name())));
        }

        Ok(Tensor {
            shape: self.shape.clone(),
            dtype: self.dtype,
            storage: Storage::Host(Arc::from(bytes)),
        })
    }

    /// Place this tensor on `device`
    ///
    /// Devices without accelerator backing receive host storage. Tensors already
    /// resident on `device` are returned aliased.
    pub fn to_device(&self, device: &Arc<dyn Device>) -> Result<Tensor> {
        if !device.has_accelerator_backing() {
            return self.to_host();
        }
        if let Storage::Device(alloc) = &self.storage {
            if Arc::ptr_eq(&alloc.device, device) {
                return Ok(self.clone());
            }
        }

        let host = self.to_host()?;
        let bytes = host.host_bytes()?;
        let mut span = TransferSpan::new(TransferDirection::HostToDevice, bytes.len(), device.name().to_string());
        let buffer = device.allocate_buffer(bytes.len()).inspect_err(|_| span.fail())?;
        let alloc = DeviceAllocation {
            device: Arc::clone(device),
            buffer,
            len: bytes.len(),
        };
        // From here on the allocation frees itself if the copy fails
        device.copy_to_buffer(buffer, bytes).inspect_err(|_| span.fail())?;

        Ok(Tensor {
            shape: self.shape.clone(),
            dtype: self.dtype,
            storage: Storage::Device(Arc::new(alloc)),
        })
    }

    /// Independent host copy of the contents
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReadFailed`] when the tensor is not host-resident.
    pub fn deep_copy(&self) -> Result<Tensor> {
        let bytes = self.host_bytes()?;
        Ok(Tensor {
            shape: self.shape.clone(),
            dtype: self.dtype,
            storage: Storage::Host(Arc::from(bytes)),
        })
    }

    /// True when both tensors alias the same storage
    pub fn shares_storage_with(&self, other: &Tensor) -> bool {
        match (&self.storage, &other.storage) {
            (Storage::Host(a), Storage::Host(b)) => Arc::ptr_eq(a, b),
            (Storage::Device(a), Storage::Device(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let location = match &self.storage {
            Storage::Host(_) => "host".to_string(),
            Storage::Device(alloc) => format!("{}@{}", alloc.buffer, alloc.device.name()),
        };
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("dtype", &self.dtype)
            .field("storage", &location)
            .finish()
    }
}
