//! Polling a single camera
//!
//! [`CameraPoller::poll_camera`] fetches the camera image, publishes latency
//! and the raw image, optionally saves the image to the image folder, and
//! reports the outcome as the camera's run-state.
//!
//! Images are published unsigned so third-party consumers can use the bytes
//! directly. Saving is independent of publication: a failed save is returned
//! to the caller but the image is still published and the camera stays ready.

use chrono::Utc;
use ipcam_core::device::{attr, status};
use ipcam_core::{CameraRegistry, DeviceId, OutputHandle, OutputKind, RunState, DEFAULT_OUTPUT_INSTANCE};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::fetch::{FetchError, FetchedImage, Fetcher};
use crate::scheduler::InFlight;

#[derive(Error, Debug)]
pub enum PollError {
    /// The image could not be fetched; the camera is now in error
    #[error("{message}")]
    Fetch {
        device: DeviceId,
        message: String,
        #[source]
        source: FetchError,
    },
    /// The image was fetched and published but could not be saved
    #[error("Failed to save image of camera {device} to {}: {source}", .path.display())]
    Save {
        device: DeviceId,
        path: PathBuf,
        image: Vec<u8>,
        #[source]
        source: io::Error,
    },
}

impl PollError {
    /// Image bytes fetched before the error, if any
    pub fn image(&self) -> Option<&[u8]> {
        match self {
            PollError::Fetch { .. } => None,
            PollError::Save { image, .. } => Some(image),
        }
    }

    pub fn device(&self) -> &DeviceId {
        match self {
            PollError::Fetch { device, .. } | PollError::Save { device, .. } => device,
        }
    }
}

/// Polls cameras and publishes their images through the registry
pub struct CameraPoller<R: CameraRegistry + ?Sized> {
    registry: Arc<R>,
    fetcher: Fetcher,
    image_folder: PathBuf,
    in_flight: InFlight,
}

impl<R: CameraRegistry + ?Sized> CameraPoller<R> {
    pub fn new(registry: Arc<R>, fetcher: Fetcher, image_folder: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            fetcher,
            image_folder: image_folder.into(),
            in_flight: InFlight::default(),
        }
    }

    pub fn registry(&self) -> &Arc<R> {
        &self.registry
    }

    /// Cameras with a poll in progress, shared by the scheduler and manual polls
    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    /// Poll one camera and publish the result
    pub async fn poll_camera(&self, device: &DeviceId) -> Result<Vec<u8>, PollError> {
        let registry = &self.registry;
        let url = registry.get_device_config_string(device, attr::URL, "");
        let login = registry.get_device_config_string(device, attr::LOGIN_NAME, "");
        let password = registry.get_device_config_string(device, attr::PASSWORD, "");
        info!(device = %device, url = %url, "Polling camera");

        match self.fetcher.fetch(&url, &login, &password).await {
            Ok(fetched) => self.publish(device, fetched).await,
            Err(source) => {
                let message = format!("Unable to get image from camera {}: {}", device, source);
                registry.set_device_run_state(device, RunState::Error, &message);
                Err(PollError::Fetch {
                    device: device.clone(),
                    message,
                    source,
                })
            }
        }
    }

    async fn publish(&self, device: &DeviceId, fetched: FetchedImage) -> Result<Vec<u8>, PollError> {
        let registry = &self.registry;
        let latency = fetched.latency_millis().to_string();
        registry.update_device_status(device, status::LATENCY_MSEC, &latency);
        registry.update_output_value(device, OutputKind::Latency, DEFAULT_OUTPUT_INSTANCE, &latency);
        registry.update_device_status(device, status::LAST_POLL, &Utc::now().to_rfc3339());

        let image = fetched.payload;
        let filename = registry.get_device_config_string(device, attr::FILENAME, "");
        let saved = if filename.is_empty() {
            Ok(())
        } else {
            self.save_image(&filename, &image).await
        };

        let output = OutputHandle::new(device.clone(), OutputKind::Image, DEFAULT_OUTPUT_INSTANCE);
        registry.publish_raw_output(&output, false, &image);
        registry.set_device_run_state(device, RunState::Ready, "");

        debug!(device = %device, size = image.len(), latency_ms = %latency, "Camera image published");

        match saved {
            Ok(()) => Ok(image),
            Err((path, source)) => {
                warn!(device = %device, path = %path.display(), error = %source, "Failed to save camera image");
                Err(PollError::Save {
                    device: device.clone(),
                    path,
                    image,
                    source,
                })
            }
        }
    }

    /// Write the image to `filename` inside the image folder
    async fn save_image(&self, filename: &str, image: &[u8]) -> Result<(), (PathBuf, io::Error)> {
        let relative = Path::new(filename);
        let path = self.image_folder.join(relative);
        if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            let err = io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("filename '{}' must stay inside the image folder", filename),
            );
            return Err((path, err));
        }

        debug!(path = %path.display(), "Saving image to file");
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Err((path, e));
            }
        }
        match tokio::fs::write(&path, image).await {
            Ok(()) => Ok(()),
            Err(e) => Err((path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{camera_server, unreachable_url, TEST_IMAGE, TEST_LOGIN, TEST_PASSWORD};
    use ipcam_core::{AttrMap, MemoryRegistry, NewCamera, PublishEvent};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::broadcast;

    fn setup(url: &str, filename: Option<&str>) -> (Arc<MemoryRegistry>, CameraPoller<MemoryRegistry>, DeviceId, TempDir) {
        let registry = Arc::new(MemoryRegistry::new("test"));
        let id = DeviceId::from("Snowshed-east");
        registry.add_camera(&NewCamera {
            id: id.clone(),
            url: url.to_string(),
            poll_interval: 5,
            filename: filename.map(str::to_string),
            ..Default::default()
        });
        let dir = TempDir::new().unwrap();
        let fetcher = Fetcher::new(Duration::from_secs(5)).unwrap();
        let poller = CameraPoller::new(registry.clone(), fetcher, dir.path());
        (registry, poller, id, dir)
    }

    fn latency(registry: &MemoryRegistry, id: &DeviceId) -> Option<String> {
        registry.output_value(id, OutputKind::Latency, DEFAULT_OUTPUT_INSTANCE)
    }

    /// Latency output updates received since the last call
    fn latency_updates(events: &mut broadcast::Receiver<PublishEvent>) -> usize {
        let mut count = 0;
        while let Ok(event) = events.try_recv() {
            if let PublishEvent::OutputValue { output, .. } = event {
                if output.kind == OutputKind::Latency {
                    count += 1;
                }
            }
        }
        count
    }

    #[tokio::test]
    async fn test_poll_publishes_image_and_latency() {
        let addr = camera_server().await;
        let (registry, poller, id, _dir) = setup(&format!("http://{}/open.jpg", addr), None);

        let image = poller.poll_camera(&id).await.unwrap();
        assert_eq!(image, TEST_IMAGE);

        let latency: u64 = latency(&registry, &id).unwrap().parse().unwrap();
        assert!(latency > 0);
        assert_eq!(
            registry.status_value(&id, status::LATENCY_MSEC),
            Some(latency.to_string())
        );
        assert_eq!(
            registry.output_raw(&id, OutputKind::Image, DEFAULT_OUTPUT_INSTANCE).as_deref(),
            Some(TEST_IMAGE)
        );
        assert_eq!(registry.run_state(&id), Some((RunState::Ready, String::new())));
    }

    #[tokio::test]
    async fn test_poll_uses_configured_credentials() {
        let addr = camera_server().await;
        let (registry, poller, id, _dir) = setup(&format!("http://{}/private.jpg", addr), None);
        assert!(poller.poll_camera(&id).await.is_err());

        let mut attrs = AttrMap::new();
        attrs.insert(attr::LOGIN_NAME.to_string(), TEST_LOGIN.to_string());
        attrs.insert(attr::PASSWORD.to_string(), TEST_PASSWORD.to_string());
        registry.update_device_config_values(&id, &attrs).unwrap();

        assert_eq!(poller.poll_camera(&id).await.unwrap(), TEST_IMAGE);
        assert_eq!(registry.run_state(&id).unwrap().0, RunState::Ready);
    }

    #[tokio::test]
    async fn test_poll_failure_sets_error_state() {
        let (registry, poller, id, _dir) = setup(&unreachable_url(), None);

        let err = poller.poll_camera(&id).await.unwrap_err();
        assert!(matches!(err, PollError::Fetch { .. }));
        assert!(err.image().is_none());
        assert_eq!(err.device(), &id);

        let (state, message) = registry.run_state(&id).unwrap();
        assert_eq!(state, RunState::Error);
        assert!(message.starts_with("Unable to get image from camera Snowshed-east"));
        assert!(latency(&registry, &id).is_none());
    }

    #[tokio::test]
    async fn test_failed_poll_keeps_previous_latency() {
        let addr = camera_server().await;
        let (registry, poller, id, _dir) = setup(&format!("http://{}/open.jpg", addr), None);

        let mut events = registry.subscribe();

        poller.poll_camera(&id).await.unwrap();
        poller.poll_camera(&id).await.unwrap();
        assert_eq!(latency_updates(&mut events), 2);
        let second = latency(&registry, &id).unwrap();
        assert!(second.parse::<u64>().unwrap() > 0);

        let mut attrs = AttrMap::new();
        attrs.insert(attr::URL.to_string(), format!("http://{}/badurl.jpg", addr));
        registry.update_device_config_values(&id, &attrs).unwrap();

        assert!(poller.poll_camera(&id).await.is_err());
        assert_eq!(latency_updates(&mut events), 0);
        assert_eq!(latency(&registry, &id), Some(second));
        assert_eq!(registry.run_state(&id).unwrap().0, RunState::Error);
    }

    #[tokio::test]
    async fn test_recovery_clears_error() {
        let addr = camera_server().await;
        let (registry, poller, id, _dir) = setup(&format!("http://{}/badurl.jpg", addr), None);
        assert!(poller.poll_camera(&id).await.is_err());
        assert_eq!(registry.run_state(&id).unwrap().0, RunState::Error);

        let mut attrs = AttrMap::new();
        attrs.insert(attr::URL.to_string(), format!("http://{}/open.jpg", addr));
        registry.update_device_config_values(&id, &attrs).unwrap();

        poller.poll_camera(&id).await.unwrap();
        assert_eq!(registry.run_state(&id), Some((RunState::Ready, String::new())));
    }

    #[tokio::test]
    async fn test_poll_saves_image_to_file() {
        let addr = camera_server().await;
        let (_registry, poller, id, dir) =
            setup(&format!("http://{}/open.jpg", addr), Some("kelowna-snapshot.jpg"));

        let image = poller.poll_camera(&id).await.unwrap();
        let saved = std::fs::read(dir.path().join("kelowna-snapshot.jpg")).unwrap();
        assert_eq!(saved, image);
    }

    #[tokio::test]
    async fn test_save_into_subfolder() {
        let addr = camera_server().await;
        let (_registry, poller, id, dir) =
            setup(&format!("http://{}/open.jpg", addr), Some("east/latest.jpg"));

        poller.poll_camera(&id).await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("east/latest.jpg")).unwrap(), TEST_IMAGE);
    }

    #[tokio::test]
    async fn test_save_failure_still_publishes() {
        let addr = camera_server().await;
        let (registry, poller, id, _dir) =
            setup(&format!("http://{}/open.jpg", addr), Some("../escape.jpg"));

        let err = poller.poll_camera(&id).await.unwrap_err();
        assert!(matches!(err, PollError::Save { .. }));
        assert_eq!(err.image(), Some(TEST_IMAGE));
        assert_eq!(
            registry.output_raw(&id, OutputKind::Image, DEFAULT_OUTPUT_INSTANCE).as_deref(),
            Some(TEST_IMAGE)
        );
        assert_eq!(registry.run_state(&id).unwrap().0, RunState::Ready);
    }
}
