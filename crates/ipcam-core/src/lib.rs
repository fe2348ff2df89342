//! ipcam Core - Camera types, configuration attributes, and camera registry
//!
//! This crate provides the foundational types for the ipcam poller:
//! - Device identity, run-state and output kinds
//! - Configuration attributes with bounds and secret handling
//! - The [`CameraRegistry`] interface the poller publishes through
//! - An in-process [`MemoryRegistry`] implementation

pub mod attr;
pub mod device;
pub mod memory;
pub mod registry;

pub use attr::{AttrMap, ConfigAttr, DataType};
pub use device::{
    DeviceId, NodeType, OutputHandle, OutputKind, RunState, DEFAULT_OUTPUT_INSTANCE,
    DEFAULT_POLL_INTERVAL, MAX_POLL_INTERVAL, MIN_POLL_INTERVAL,
};
pub use memory::{MemoryRegistry, NewCamera, NodeDiscovery, OutputDiscovery, PublishEvent};
pub use registry::{CameraRegistry, RegistryError};
