//! Handles and identifiers shared by every device implementation

use crate::error::{DeviceError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Handle to an allocated device buffer
///
/// Buffers are opaque handles managed by the device that issued them.
/// Use [`crate::Device`] methods to interact with buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u64);

impl BufferHandle {
    /// Create a new buffer handle
    pub const fn new(id: u64) -> Self {
        BufferHandle(id)
    }

    /// Get the internal ID
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf{}", self.0)
    }
}

/// Coarse classification of a standard device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Host memory, directly addressable by the caller
    Cpu,
    /// Accelerator memory that must be copied before host access
    Accelerator,
}

impl DeviceKind {
    /// Device type string used inside fully qualified names
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceKind::Cpu => "CPU",
            DeviceKind::Accelerator => "GPU",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully qualified device name: `/job:J/replica:R/task:T/device:TYPE:ID`
///
/// Parsing accepts the `replica` and `task` segments in either order; formatting
/// always emits the canonical order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceName {
    pub job: String,
    pub replica: u32,
    pub task: u32,
    pub device_type: String,
    pub id: u32,
}

impl DeviceName {
    /// Build a name for a device owned by the local job
    pub fn local(device_type: impl Into<String>, id: u32) -> Self {
        Self {
            job: "localhost".to_string(),
            replica: 0,
            task: 0,
            device_type: device_type.into(),
            id,
        }
    }

    /// The canonical host CPU name, `/job:localhost/replica:0/task:0/device:CPU:0`
    pub fn host_cpu() -> Self {
        Self::local(DeviceKind::Cpu.as_str(), 0)
    }

    /// True when the device type is `CPU`
    pub fn is_cpu(&self) -> bool {
        self.device_type.eq_ignore_ascii_case("cpu")
    }
}

impl fmt::Display for DeviceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/job:{}/replica:{}/task:{}/device:{}:{}",
            self.job, self.replica, self.task, self.device_type, self.id
        )
    }
}

impl FromStr for DeviceName {
    type Err = DeviceError;

    fn from_str(name: &str) -> Result<Self> {
        let body = name
            .strip_prefix('/')
            .ok_or_else(|| DeviceError::invalid_name(name, "must start with '/'"))?;

        let mut job = None;
        let mut replica = None;
        let mut task = None;
        let mut device = None;

        for segment in body.split('/') {
            let (key, value) = segment
                .split_once(':')
                .ok_or_else(|| DeviceError::invalid_name(name, format!("segment {segment:?} has no ':'")))?;
            match key {
                "job" if !value.is_empty() => job = Some(value.to_string()),
                "replica" => replica = Some(parse_index(name, "replica", value)?),
                "task" => task = Some(parse_index(name, "task", value)?),
                "device" => {
                    let (ty, id) = value
                        .split_once(':')
                        .ok_or_else(|| DeviceError::invalid_name(name, "device segment must be TYPE:ID"))?;
                    if ty.is_empty() {
                        return Err(DeviceError::invalid_name(name, "empty device type"));
                    }
                    device = Some((ty.to_string(), parse_index(name, "device id", id)?));
                }
                _ => {
                    return Err(DeviceError::invalid_name(name, format!("unexpected segment {segment:?}")));
                }
            }
        }

        let (device_type, id) = device.ok_or_else(|| DeviceError::invalid_name(name, "missing device segment"))?;
        Ok(Self {
            job: job.ok_or_else(|| DeviceError::invalid_name(name, "missing job segment"))?,
            replica: replica.unwrap_or(0),
            task: task.unwrap_or(0),
            device_type,
            id,
        })
    }
}

fn parse_index(name: &str, what: &str, value: &str) -> Result<u32> {
    value
        .parse::<u32>()
        .map_err(|_| DeviceError::invalid_name(name, format!("{what} {value:?} is not an integer")))
}

impl TryFrom<String> for DeviceName {
    type Error = DeviceError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DeviceName> for String {
    fn from(name: DeviceName) -> Self {
        name.to_string()
    }
}
