//! Runtime configuration for a [`crate::Context`]

use eager_devices::DeviceName;
use serde::{Deserialize, Serialize};
use std::env;

/// Default bound on custom-device copy chains
pub const DEFAULT_MAX_CUSTOM_DEVICE_HOPS: usize = 64;

/// Context-wide runtime settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Whether new handles may cache device→host copies in their local mirror
    pub implicit_mirroring: bool,
    /// Maximum plugin copies a single resolution may chain through
    pub max_custom_device_hops: usize,
    /// Name of the host CPU device
    pub host_device_name: DeviceName,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            implicit_mirroring: true,
            max_custom_device_hops: DEFAULT_MAX_CUSTOM_DEVICE_HOPS,
            host_device_name: DeviceName::host_cpu(),
        }
    }
}

impl ContextConfig {
    pub fn with_implicit_mirroring(mut self, enabled: bool) -> Self {
        self.implicit_mirroring = enabled;
        self
    }

    pub fn with_max_custom_device_hops(mut self, hops: usize) -> Self {
        self.max_custom_device_hops = hops;
        self
    }

    pub fn with_host_device_name(mut self, name: DeviceName) -> Self {
        self.host_device_name = name;
        self
    }

    /// Build a configuration from defaults overridden by environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `EAGER_IMPLICIT_MIRRORING` - `true`/`1`/`yes` or `false`/`0`/`no`
    /// - `EAGER_MAX_CUSTOM_DEVICE_HOPS` - Non-negative hop bound; `0` rejects every custom device handle
    /// - `EAGER_HOST_DEVICE` - Fully qualified host CPU device name
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = env::var("EAGER_IMPLICIT_MIRRORING") {
            match parse_flag(&value) {
                Some(enabled) => config.implicit_mirroring = enabled,
                None => tracing::warn!(key = "EAGER_IMPLICIT_MIRRORING", value = %value, "ignoring_invalid_config"),
            }
        }

        if let Ok(value) = env::var("EAGER_MAX_CUSTOM_DEVICE_HOPS") {
            match value.trim().parse::<usize>() {
                Ok(hops) => config.max_custom_device_hops = hops,
                Err(_) => tracing::warn!(key = "EAGER_MAX_CUSTOM_DEVICE_HOPS", value = %value, "ignoring_invalid_config"),
            }
        }

        if let Ok(value) = env::var("EAGER_HOST_DEVICE") {
            match value.trim().parse::<DeviceName>() {
                Ok(name) => config.host_device_name = name,
                Err(err) => tracing::warn!(key = "EAGER_HOST_DEVICE", error = %err, "ignoring_invalid_config"),
            }
        }

        config
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
