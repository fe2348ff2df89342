//! In-process camera registry
//!
//! [`MemoryRegistry`] keeps every camera node in memory and publishes changes
//! as [`PublishEvent`]s on a broadcast channel. It retains the last value of
//! each output, including the last raw image, so late subscribers can read the
//! current state.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::attr::{AttrMap, ConfigAttr};
use crate::device::{
    attr, DeviceId, NodeType, OutputHandle, OutputKind, RunState, DEFAULT_OUTPUT_INSTANCE,
    MAX_POLL_INTERVAL, MIN_POLL_INTERVAL,
};
use crate::registry::{CameraRegistry, RegistryError};

/// Publisher id used when none is configured
pub const DEFAULT_PUBLISHER_ID: &str = "ipcam";

/// Camera definition used to create a node at startup
#[derive(Debug, Clone, Default)]
pub struct NewCamera {
    pub id: DeviceId,
    pub url: String,
    pub login: Option<String>,
    pub password: Option<String>,
    pub poll_interval: i64,
    pub description: String,
    pub filename: Option<String>,
}

/// Change published by the registry
#[derive(Debug, Clone)]
pub enum PublishEvent {
    /// An output value was updated
    OutputValue { output: OutputHandle, value: String },
    /// A raw payload was published on an output
    RawOutput {
        output: OutputHandle,
        signed: bool,
        payload: Arc<[u8]>,
    },
    /// A status entry changed
    Status {
        device: DeviceId,
        key: String,
        value: String,
    },
    /// Device health changed or was re-asserted
    RunState {
        device: DeviceId,
        state: RunState,
        message: String,
    },
    /// Configuration attributes were updated (names only)
    ConfigUpdated { device: DeviceId, attrs: Vec<String> },
}

/// Retained state of one output
#[derive(Debug, Clone)]
struct OutputState {
    kind: OutputKind,
    instance: String,
    value: Option<String>,
    raw: Option<Arc<[u8]>>,
    updated: Option<DateTime<Utc>>,
}

impl OutputState {
    fn new(kind: OutputKind, instance: &str) -> Self {
        Self {
            kind,
            instance: instance.to_string(),
            value: None,
            raw: None,
            updated: None,
        }
    }

    fn matches(&self, kind: OutputKind, instance: &str) -> bool {
        self.kind == kind && self.instance == instance
    }
}

#[derive(Debug, Clone)]
struct CameraNode {
    id: DeviceId,
    node_type: NodeType,
    attrs: AttrMap,
    config: BTreeMap<String, ConfigAttr>,
    status: AttrMap,
    run_state: RunState,
    error_message: String,
    outputs: Vec<OutputState>,
}

impl CameraNode {
    fn new(camera: &NewCamera) -> Self {
        let mut attrs = AttrMap::new();
        attrs.insert(attr::DESCRIPTION.to_string(), camera.description.clone());

        let mut config = BTreeMap::new();
        config.insert(
            attr::URL.to_string(),
            ConfigAttr::string(
                "Camera URL, for example http://images.drivebc.ca/bchighwaycam/pub/cameras/2.jpg",
            )
            .with_default(camera.url.clone()),
        );
        let mut login = ConfigAttr::string("Camera login name").secret();
        login.value = camera.login.clone().filter(|l| !l.is_empty());
        config.insert(attr::LOGIN_NAME.to_string(), login);

        let mut password = ConfigAttr::string("Camera password").secret();
        password.value = camera.password.clone().filter(|p| !p.is_empty());
        config.insert(attr::PASSWORD.to_string(), password);

        let interval = camera.poll_interval.clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL);
        if interval != camera.poll_interval {
            warn!(
                device = %camera.id,
                configured = camera.poll_interval,
                applied = interval,
                "Camera poll interval out of range, clamped"
            );
        }
        config.insert(
            attr::POLL_INTERVAL.to_string(),
            ConfigAttr::int("Camera poll interval in seconds", MIN_POLL_INTERVAL, MAX_POLL_INTERVAL)
                .with_default(interval.to_string()),
        );

        let mut filename = ConfigAttr::string("Save the camera image to this file in the image folder");
        filename.value = camera.filename.clone().filter(|f| !f.is_empty());
        config.insert(attr::FILENAME.to_string(), filename);

        Self {
            id: camera.id.clone(),
            node_type: NodeType::Camera,
            attrs,
            config,
            status: AttrMap::new(),
            run_state: RunState::Initializing,
            error_message: String::new(),
            outputs: vec![
                OutputState::new(OutputKind::Image, DEFAULT_OUTPUT_INSTANCE),
                OutputState::new(OutputKind::Latency, DEFAULT_OUTPUT_INSTANCE),
            ],
        }
    }

    fn output(&self, kind: OutputKind, instance: &str) -> Option<&OutputState> {
        self.outputs.iter().find(|o| o.matches(kind, instance))
    }

    fn output_mut(&mut self, kind: OutputKind, instance: &str) -> Option<&mut OutputState> {
        self.outputs.iter_mut().find(|o| o.matches(kind, instance))
    }
}

/// Output as shown in discovery snapshots
#[derive(Debug, Clone, Serialize)]
pub struct OutputDiscovery {
    pub kind: OutputKind,
    pub instance: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
}

/// Publishable view of a camera node; secret configuration values are removed
#[derive(Debug, Clone, Serialize)]
pub struct NodeDiscovery {
    pub id: DeviceId,
    pub publisher_id: String,
    pub node_type: NodeType,
    pub attrs: AttrMap,
    pub config: BTreeMap<String, ConfigAttr>,
    pub status: AttrMap,
    pub run_state: RunState,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error_message: String,
    pub outputs: Vec<OutputDiscovery>,
}

/// Thread-safe in-memory registry and publisher
pub struct MemoryRegistry {
    publisher_id: String,
    nodes: RwLock<BTreeMap<DeviceId, CameraNode>>,
    event_tx: broadcast::Sender<PublishEvent>,
}

impl MemoryRegistry {
    pub fn new(publisher_id: impl Into<String>) -> Self {
        let mut publisher_id = publisher_id.into();
        if publisher_id.is_empty() {
            publisher_id = DEFAULT_PUBLISHER_ID.to_string();
        }
        let (event_tx, _) = broadcast::channel(256);
        Self {
            publisher_id,
            nodes: RwLock::new(BTreeMap::new()),
            event_tx,
        }
    }

    pub fn publisher_id(&self) -> &str {
        &self.publisher_id
    }

    /// Create a camera node with its configuration attributes and outputs.
    /// An existing node with the same id is replaced.
    pub fn add_camera(&self, camera: &NewCamera) {
        let node = CameraNode::new(camera);
        info!(device = %camera.id, url = %camera.url, "Camera added");
        self.write().insert(camera.id.clone(), node);
    }

    /// Subscribe to publication events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishEvent> {
        self.event_tx.subscribe()
    }

    /// Discovery snapshot of a single camera
    pub fn discovery(&self, device: &DeviceId) -> Option<NodeDiscovery> {
        self.read().get(device).map(|node| self.to_discovery(node))
    }

    /// Discovery snapshots of all cameras, ordered by id
    pub fn discover_all(&self) -> Vec<NodeDiscovery> {
        self.read().values().map(|node| self.to_discovery(node)).collect()
    }

    /// Last published value of an output
    pub fn output_value(&self, device: &DeviceId, kind: OutputKind, instance: &str) -> Option<String> {
        self.read()
            .get(device)
            .and_then(|node| node.output(kind, instance))
            .and_then(|output| output.value.clone())
    }

    /// Last raw payload published on an output
    pub fn output_raw(&self, device: &DeviceId, kind: OutputKind, instance: &str) -> Option<Arc<[u8]>> {
        self.read()
            .get(device)
            .and_then(|node| node.output(kind, instance))
            .and_then(|output| output.raw.clone())
    }

    pub fn run_state(&self, device: &DeviceId) -> Option<(RunState, String)> {
        self.read()
            .get(device)
            .map(|node| (node.run_state, node.error_message.clone()))
    }

    pub fn status_value(&self, device: &DeviceId, key: &str) -> Option<String> {
        self.read().get(device).and_then(|node| node.status.get(key).cloned())
    }

    fn to_discovery(&self, node: &CameraNode) -> NodeDiscovery {
        NodeDiscovery {
            id: node.id.clone(),
            publisher_id: self.publisher_id.clone(),
            node_type: node.node_type,
            attrs: node.attrs.clone(),
            config: node
                .config
                .iter()
                .map(|(name, attr)| (name.clone(), attr.redacted()))
                .collect(),
            status: node.status.clone(),
            run_state: node.run_state,
            error_message: node.error_message.clone(),
            outputs: node
                .outputs
                .iter()
                .map(|o| OutputDiscovery {
                    kind: o.kind,
                    instance: o.instance.clone(),
                    value: o.value.clone(),
                    raw_size: o.raw.as_ref().map(|r| r.len()),
                    updated: o.updated,
                })
                .collect(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<DeviceId, CameraNode>> {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<DeviceId, CameraNode>> {
        self.nodes.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn config_value(&self, device: &DeviceId, name: &str) -> Option<String> {
        self.read()
            .get(device)
            .and_then(|node| node.config.get(name))
            .and_then(|a| a.effective().map(str::to_string))
    }
}

impl CameraRegistry for MemoryRegistry {
    fn get_device_config_string(&self, device: &DeviceId, attr: &str, default: &str) -> String {
        self.config_value(device, attr)
            .unwrap_or_else(|| default.to_string())
    }

    fn get_device_config_int(&self, device: &DeviceId, attr: &str, default: i64) -> i64 {
        self.config_value(device, attr)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn update_device_status(&self, device: &DeviceId, key: &str, value: &str) {
        {
            let mut nodes = self.write();
            let Some(node) = nodes.get_mut(device) else {
                warn!(device = %device, key = %key, "Status update for unknown device");
                return;
            };
            node.status.insert(key.to_string(), value.to_string());
        }
        let _ = self.event_tx.send(PublishEvent::Status {
            device: device.clone(),
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    fn update_output_value(&self, device: &DeviceId, kind: OutputKind, instance: &str, value: &str) {
        {
            let mut nodes = self.write();
            let Some(output) = nodes
                .get_mut(device)
                .and_then(|node| node.output_mut(kind, instance))
            else {
                warn!(device = %device, output = %kind, instance = %instance, "Value for unknown output");
                return;
            };
            output.value = Some(value.to_string());
            output.updated = Some(Utc::now());
        }
        let _ = self.event_tx.send(PublishEvent::OutputValue {
            output: OutputHandle::new(device.clone(), kind, instance),
            value: value.to_string(),
        });
    }

    fn publish_raw_output(&self, output: &OutputHandle, signed: bool, payload: &[u8]) {
        let payload: Arc<[u8]> = Arc::from(payload);
        {
            let mut nodes = self.write();
            let Some(state) = nodes
                .get_mut(&output.device)
                .and_then(|node| node.output_mut(output.kind, &output.instance))
            else {
                warn!(output = %output, "Raw publication on unknown output");
                return;
            };
            state.raw = Some(payload.clone());
            state.updated = Some(Utc::now());
        }
        debug!(output = %output, size = payload.len(), signed = signed, "Published raw output");
        let _ = self.event_tx.send(PublishEvent::RawOutput {
            output: output.clone(),
            signed,
            payload,
        });
    }

    fn set_device_run_state(&self, device: &DeviceId, state: RunState, message: &str) {
        {
            let mut nodes = self.write();
            let Some(node) = nodes.get_mut(device) else {
                warn!(device = %device, "Run state for unknown device");
                return;
            };
            node.run_state = state;
            node.error_message = message.to_string();
        }
        let _ = self.event_tx.send(PublishEvent::RunState {
            device: device.clone(),
            state,
            message: message.to_string(),
        });
    }

    fn list_devices(&self) -> Vec<DeviceId> {
        self.read().keys().cloned().collect()
    }

    fn update_device_config_values(&self, device: &DeviceId, attrs: &AttrMap) -> Result<(), RegistryError> {
        {
            let mut nodes = self.write();
            let node = nodes
                .get_mut(device)
                .ok_or_else(|| RegistryError::UnknownDevice(device.clone()))?;

            let mut accepted = Vec::with_capacity(attrs.len());
            for (name, proposed) in attrs {
                let attr = node.config.get(name).ok_or_else(|| RegistryError::UnknownAttribute {
                    device: device.clone(),
                    attr: name.clone(),
                })?;
                accepted.push((name.clone(), attr.accept(name, proposed)?));
            }

            for (name, value) in accepted {
                if let Some(attr) = node.config.get_mut(&name) {
                    attr.value = Some(value);
                }
            }
        }

        info!(device = %device, attrs = ?attrs.keys().collect::<Vec<_>>(), "Configuration updated");
        let _ = self.event_tx.send(PublishEvent::ConfigUpdated {
            device: device.clone(),
            attrs: attrs.keys().cloned().collect(),
        });
        Ok(())
    }
}
