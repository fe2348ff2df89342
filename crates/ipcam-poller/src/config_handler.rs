//! Camera configuration change requests
//!
//! Requests are forwarded to the registry's configuration store as-is. The
//! registry validates the values (interval bounds, integer parsing); nothing
//! here filters which attributes may be changed. A changed poll interval is
//! picked up when the camera's countdown next restarts.

use ipcam_core::{AttrMap, CameraRegistry, DeviceId, RegistryError};
use tracing::{info, warn};

/// Apply `attrs` to the configuration of `device` and return them unchanged
pub fn handle_config_change<R: CameraRegistry + ?Sized>(
    registry: &R,
    device: &DeviceId,
    attrs: AttrMap,
) -> Result<AttrMap, RegistryError> {
    info!(device = %device, attrs = ?attrs.keys().collect::<Vec<_>>(), "Configuration change requested");
    if let Err(e) = registry.update_device_config_values(device, &attrs) {
        warn!(device = %device, error = %e, "Configuration change rejected");
        return Err(e);
    }
    Ok(attrs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipcam_core::device::attr;
    use ipcam_core::{MemoryRegistry, NewCamera};

    fn registry() -> (MemoryRegistry, DeviceId) {
        let registry = MemoryRegistry::new("test");
        let id = DeviceId::from("LaSilla");
        registry.add_camera(&NewCamera {
            id: id.clone(),
            url: "http://host/lasilla.jpg".to_string(),
            poll_interval: 600,
            ..Default::default()
        });
        (registry, id)
    }

    #[test]
    fn test_config_change_applies_and_echoes() {
        let (registry, id) = registry();
        let mut attrs = AttrMap::new();
        attrs.insert(attr::POLL_INTERVAL.to_string(), "654".to_string());
        attrs.insert(attr::URL.to_string(), "http://host/other.jpg".to_string());

        let accepted = handle_config_change(&registry, &id, attrs.clone()).unwrap();
        assert_eq!(accepted, attrs);
        assert_eq!(registry.get_device_config_int(&id, attr::POLL_INTERVAL, 612), 654);
        assert_eq!(registry.get_device_config_string(&id, attr::URL, ""), "http://host/other.jpg");
    }

    #[test]
    fn test_latest_interval_wins() {
        let (registry, id) = registry();
        for value in ["654", "33"] {
            let mut attrs = AttrMap::new();
            attrs.insert(attr::POLL_INTERVAL.to_string(), value.to_string());
            handle_config_change(&registry, &id, attrs).unwrap();
        }
        assert_eq!(registry.get_device_config_int(&id, attr::POLL_INTERVAL, 600), 33);
    }

    #[test]
    fn test_registry_rejection_is_returned() {
        let (registry, _id) = registry();
        let err = handle_config_change(&registry, &DeviceId::from("someaddress"), AttrMap::new()).unwrap_err();
        assert_eq!(err, RegistryError::UnknownDevice(DeviceId::from("someaddress")));
    }
}
