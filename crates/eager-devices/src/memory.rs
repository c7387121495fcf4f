//! Heap-backed devices
//!
//! [`MemoryDevice`] stores every buffer in process memory. Constructed with
//! [`MemoryDevice::cpu`] it is the host device; constructed with
//! [`MemoryDevice::accelerator`] it reports accelerator backing, so tensors placed on
//! it must be copied before host access. The accelerator flavour backs development
//! and testing of placement-sensitive code on machines without an accelerator.

use crate::device::Device;
use crate::error::{DeviceError, Result};
use crate::types::{BufferHandle, DeviceKind, DeviceName};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Buffer table for a single device
struct MemoryManager {
    /// Buffers storage (heap-allocated)
    buffers: HashMap<u64, Vec<u8>>,

    /// Next buffer handle ID
    next_buffer_id: u64,

    /// Bytes currently allocated
    allocated_bytes: usize,
}

impl MemoryManager {
    fn new() -> Self {
        Self {
            buffers: HashMap::new(),
            next_buffer_id: 1,
            allocated_bytes: 0,
        }
    }

    fn allocate_buffer(&mut self, size: usize) -> BufferHandle {
        let id = self.next_buffer_id;
        self.next_buffer_id += 1;

        self.buffers.insert(id, vec![0u8; size]);
        self.allocated_bytes += size;

        BufferHandle::new(id)
    }

    fn free_buffer(&mut self, handle: BufferHandle) -> Option<usize> {
        let freed = self.buffers.remove(&handle.id())?.len();
        self.allocated_bytes -= freed;
        Some(freed)
    }

    fn buffer(&self, handle: BufferHandle) -> Option<&Vec<u8>> {
        self.buffers.get(&handle.id())
    }

    fn buffer_mut(&mut self, handle: BufferHandle) -> Option<&mut Vec<u8>> {
        self.buffers.get_mut(&handle.id())
    }
}

/// Point-in-time copy counters for a [`MemoryDevice`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    /// Host-to-device copies performed
    pub h2d_copies: u64,
    /// Device-to-host copies performed
    pub d2h_copies: u64,
    /// Bytes moved host-to-device
    pub h2d_bytes: u64,
    /// Bytes moved device-to-host
    pub d2h_bytes: u64,
    /// Buffers currently live
    pub live_buffers: usize,
}

#[derive(Default)]
struct Counters {
    h2d_copies: AtomicU64,
    d2h_copies: AtomicU64,
    h2d_bytes: AtomicU64,
    d2h_bytes: AtomicU64,
}

/// Device whose buffers live on the process heap
pub struct MemoryDevice {
    name: DeviceName,
    kind: DeviceKind,
    capacity: Option<usize>,
    memory: RwLock<MemoryManager>,
    counters: Counters,
}

impl MemoryDevice {
    /// Host CPU device with the canonical local name
    pub fn cpu() -> Self {
        Self::with_name(DeviceName::host_cpu(), DeviceKind::Cpu)
    }

    /// Accelerator-backed device `/job:localhost/replica:0/task:0/device:GPU:{id}`
    pub fn accelerator(id: u32) -> Self {
        Self::with_name(DeviceName::local(DeviceKind::Accelerator.as_str(), id), DeviceKind::Accelerator)
    }

    /// Device with an explicit name and kind
    pub fn with_name(name: DeviceName, kind: DeviceKind) -> Self {
        tracing::debug!(device = %name, kind = %kind, "memory_device_created");
        Self {
            name,
            kind,
            capacity: None,
            memory: RwLock::new(MemoryManager::new()),
            counters: Counters::default(),
        }
    }

    /// Cap the total number of bytes this device may hold
    pub fn with_capacity_limit(mut self, bytes: usize) -> Self {
        self.capacity = Some(bytes);
        self
    }

    /// Snapshot of the copy counters
    pub fn stats(&self) -> DeviceStats {
        DeviceStats {
            h2d_copies: self.counters.h2d_copies.load(Ordering::Relaxed),
            d2h_copies: self.counters.d2h_copies.load(Ordering::Relaxed),
            h2d_bytes: self.counters.h2d_bytes.load(Ordering::Relaxed),
            d2h_bytes: self.counters.d2h_bytes.load(Ordering::Relaxed),
            live_buffers: self.memory.read().buffers.len(),
        }
    }

    /// Bytes currently allocated on this device
    pub fn allocated_bytes(&self) -> usize {
        self.memory.read().allocated_bytes
    }

    fn invalid_handle(&self, handle: BufferHandle) -> DeviceError {
        DeviceError::InvalidBufferHandle {
            device: self.name.to_string(),
            handle: handle.id(),
        }
    }
}

impl Device for MemoryDevice {
    fn name(&self) -> &DeviceName {
        &self.name
    }

    fn kind(&self) -> DeviceKind {
        self.kind
    }

    fn allocate_buffer(&self, size: usize) -> Result<BufferHandle> {
        let mut memory = self.memory.write();
        if let Some(capacity) = self.capacity {
            if memory.allocated_bytes + size > capacity {
                return Err(DeviceError::AllocationFailed {
                    device: self.name.to_string(),
                    requested: size,
                    reason: format!("{} of {} bytes in use", memory.allocated_bytes, capacity),
                });
            }
        }
        let handle = memory.allocate_buffer(size);
        tracing::trace!(device = %self.name, %handle, size, "buffer_allocated");
        Ok(handle)
    }

    fn free_buffer(&self, handle: BufferHandle) -> Result<()> {
        let freed = self
            .memory
            .write()
            .free_buffer(handle)
            .ok_or_else(|| self.invalid_handle(handle))?;
        tracing::trace!(device = %self.name, %handle, bytes = freed, "buffer_freed");
        Ok(())
    }

    fn copy_to_buffer(&self, handle: BufferHandle, data: &[u8]) -> Result<()> {
        let mut memory = self.memory.write();
        let buffer = memory.buffer_mut(handle).ok_or_else(|| self.invalid_handle(handle))?;

        if data.len() > buffer.len() {
            return Err(DeviceError::BufferOutOfBounds {
                size: data.len(),
                buffer_size: buffer.len(),
            });
        }

        buffer[..data.len()].copy_from_slice(data);
        self.counters.h2d_copies.fetch_add(1, Ordering::Relaxed);
        self.counters.h2d_bytes.fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn copy_from_buffer(&self, handle: BufferHandle, data: &mut [u8]) -> Result<()> {
        let memory = self.memory.read();
        let buffer = memory.buffer(handle).ok_or_else(|| self.invalid_handle(handle))?;

        if data.len() > buffer.len() {
            return Err(DeviceError::BufferOutOfBounds {
                size: data.len(),
                buffer_size: buffer.len(),
            });
        }

        data.copy_from_slice(&buffer[..data.len()]);
        self.counters.d2h_copies.fetch_add(1, Ordering::Relaxed);
        self.counters.d2h_bytes.fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn buffer_size(&self, handle: BufferHandle) -> Result<usize> {
        self.memory
            .read()
            .buffer(handle)
            .map(Vec::len)
            .ok_or_else(|| self.invalid_handle(handle))
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_allocation() {
        let device = MemoryDevice::cpu();
        let handle = device.allocate_buffer(1024).unwrap();
        assert_eq!(device.buffer_size(handle).unwrap(), 1024);
        assert_eq!(device.allocated_bytes(), 1024);

        device.free_buffer(handle).unwrap();
        assert_eq!(device.allocated_bytes(), 0);
        assert!(device.buffer_size(handle).is_err());
    }

    #[test]
    fn test_buffer_copy_counts() {
        let device = MemoryDevice::accelerator(0);
        let handle = device.allocate_buffer(16).unwrap();

        let data = [1u8, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16];
        device.copy_to_buffer(handle, &data).unwrap();

        let mut out = [0u8; 16];
        device.copy_from_buffer(handle, &mut out).unwrap();
        assert_eq!(out, data);

        let stats = device.stats();
        assert_eq!(stats.h2d_copies, 1);
        assert_eq!(stats.d2h_copies, 1);
        assert_eq!(stats.h2d_bytes, 16);
        assert_eq!(stats.live_buffers, 1);
    }

    #[test]
    fn test_copy_out_of_bounds() {
        let device = MemoryDevice::cpu();
        let handle = device.allocate_buffer(4).unwrap();
        let result = device.copy_to_buffer(handle, &[0u8; 8]);
        assert!(matches!(
            result,
            Err(DeviceError::BufferOutOfBounds { size: 8, buffer_size: 4 })
        ));
    }

    #[test]
    fn test_free_unknown_handle() {
        let device = MemoryDevice::cpu();
        let result = device.free_buffer(BufferHandle::new(99));
        assert!(matches!(result, Err(DeviceError::InvalidBufferHandle { handle: 99, .. })));
    }

    #[test]
    fn test_capacity_limit() {
        let device = MemoryDevice::accelerator(1).with_capacity_limit(32);
        let first = device.allocate_buffer(24).unwrap();
        assert!(matches!(
            device.allocate_buffer(16),
            Err(DeviceError::AllocationFailed { requested: 16, .. })
        ));
        device.free_buffer(first).unwrap();
        assert!(device.allocate_buffer(16).is_ok());
    }

    #[test]
    fn test_kinds() {
        assert!(!MemoryDevice::cpu().has_accelerator_backing());
        assert!(MemoryDevice::accelerator(0).has_accelerator_backing());
        assert_eq!(
            MemoryDevice::accelerator(2).name().to_string(),
            "/job:localhost/replica:0/task:0/device:GPU:2"
        );
    }
}
