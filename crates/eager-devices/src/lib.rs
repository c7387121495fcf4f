//! Standard devices for the eager tensor runtime
//!
//! This crate provides:
//! - **Device Trait**: buffer allocation and host↔device byte movement
//! - **Device Names**: fully qualified `/job:J/replica:R/task:T/device:TYPE:ID` names
//! - **Memory Devices**: heap-backed host CPU and accelerator-flavoured devices
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │        eager-core (tensor handles)           │
//! └─────────────────────┬────────────────────────┘
//!                       │ Arc<dyn Device>
//!         ┌─────────────┴─────────────┐
//!         ▼                           ▼
//!   ┌───────────┐              ┌─────────────┐
//!   │    CPU    │              │ Accelerator │
//!   │  (host)   │              │  (copy in)  │
//!   └───────────┘              └─────────────┘
//! ```
//!
//! Plugin devices are modelled one layer up in `eager-core`, because their copy
//! capability produces tensor handles rather than bytes.

pub mod device;
pub mod error;
pub mod memory;
pub mod types;

pub use device::Device;
pub use error::{DeviceError, Result};
pub use memory::{DeviceStats, MemoryDevice};
pub use types::{BufferHandle, DeviceKind, DeviceName};
