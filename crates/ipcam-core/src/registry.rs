//! Camera registry interface
//!
//! The registry holds per-camera configuration, status and outputs, and
//! performs publication. The poller reads and writes it only through
//! [`CameraRegistry`]; it never owns the storage.
//!
//! Implementations must be safe to call concurrently from many poll tasks.

use thiserror::Error;

use crate::attr::AttrMap;
use crate::device::{DeviceId, OutputHandle, OutputKind, RunState};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown device: {0}")]
    UnknownDevice(DeviceId),
    #[error("Unknown configuration attribute '{attr}' on {device}")]
    UnknownAttribute { device: DeviceId, attr: String },
    #[error("Invalid value '{value}' for attribute '{attr}'")]
    InvalidValue { attr: String, value: String },
}

/// Operations the poller needs from the publication framework
pub trait CameraRegistry: Send + Sync + 'static {
    /// Configured string value, or `default` when unset or unknown
    fn get_device_config_string(&self, device: &DeviceId, attr: &str, default: &str) -> String;

    /// Configured integer value, or `default` when unset, unknown or not an integer
    fn get_device_config_int(&self, device: &DeviceId, attr: &str, default: i64) -> i64;

    fn update_device_status(&self, device: &DeviceId, key: &str, value: &str);

    fn update_output_value(&self, device: &DeviceId, kind: OutputKind, instance: &str, value: &str);

    /// Publish a payload as-is. Unsigned payloads reach consumers without any wrapping.
    fn publish_raw_output(&self, output: &OutputHandle, signed: bool, payload: &[u8]);

    fn set_device_run_state(&self, device: &DeviceId, state: RunState, message: &str);

    fn list_devices(&self) -> Vec<DeviceId>;

    /// Apply configuration values. Values are validated against the attribute
    /// definitions; nothing is applied when any value is rejected.
    fn update_device_config_values(&self, device: &DeviceId, attrs: &AttrMap) -> Result<(), RegistryError>;
}
