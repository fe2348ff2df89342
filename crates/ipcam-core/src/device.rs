//! Device types for tracking polled cameras

use serde::{Deserialize, Serialize};

/// Unique identifier for a camera, taken from the configuration key
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Kind of node published by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Camera,
}

/// Health of a device as seen by its last poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// Not polled yet
    #[default]
    Initializing,
    /// Last poll fetched an image
    Ready,
    /// Last poll failed
    Error,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Initializing => "initializing",
            RunState::Ready => "ready",
            RunState::Error => "error",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output published for each camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Raw image bytes
    Image,
    /// Fetch latency in milliseconds
    Latency,
}

impl OutputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::Image => "image",
            OutputKind::Latency => "latency",
        }
    }
}

impl std::fmt::Display for OutputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instance name used when a device has a single output of a kind
pub const DEFAULT_OUTPUT_INSTANCE: &str = "0";

/// Configuration attribute names
pub mod attr {
    pub const URL: &str = "url";
    pub const LOGIN_NAME: &str = "login_name";
    pub const PASSWORD: &str = "password";
    pub const POLL_INTERVAL: &str = "poll_interval";
    pub const FILENAME: &str = "filename";
    pub const DESCRIPTION: &str = "description";
}

/// Status keys
pub mod status {
    pub const LATENCY_MSEC: &str = "latency_msec";
    pub const LAST_POLL: &str = "last_poll";
}

/// Poll interval bounds in seconds
pub const MIN_POLL_INTERVAL: i64 = 5;
pub const MAX_POLL_INTERVAL: i64 = 3600;

/// Poll interval used when a camera has none configured
pub const DEFAULT_POLL_INTERVAL: i64 = 600;

/// Identifies one output of one device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputHandle {
    pub device: DeviceId,
    pub kind: OutputKind,
    pub instance: String,
}

impl OutputHandle {
    pub fn new(device: DeviceId, kind: OutputKind, instance: &str) -> Self {
        Self {
            device,
            kind,
            instance: instance.to_string(),
        }
    }
}

impl std::fmt::Display for OutputHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.device, self.kind, self.instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_display() {
        let id = DeviceId::from("Snowshed-east");
        assert_eq!(id.as_str(), "Snowshed-east");
        assert_eq!(id.to_string(), "Snowshed-east");
    }

    #[test]
    fn test_run_state_serialization() {
        assert_eq!(serde_json::to_string(&RunState::Ready).unwrap(), "\"ready\"");
        assert_eq!(RunState::default(), RunState::Initializing);
    }

    #[test]
    fn test_output_handle_display() {
        let handle = OutputHandle::new(DeviceId::from("cam-A"), OutputKind::Image, DEFAULT_OUTPUT_INSTANCE);
        assert_eq!(handle.to_string(), "cam-A/image/0");
    }
}
