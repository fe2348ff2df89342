//! Application state management

use anyhow::{Context, Result};
use ipcam_core::{MemoryRegistry, PublishEvent};
use ipcam_poller::{CameraPoller, Fetcher, PollerService};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use crate::config::Config;

/// Shared application state
pub struct AppState {
    /// Camera registry and publisher
    pub registry: Arc<MemoryRegistry>,
    /// Camera poller, shared with the scheduler
    pub poller: Arc<CameraPoller<MemoryRegistry>>,
    /// Configuration
    pub config: Config,
}

impl AppState {
    /// Create the registry with all configured cameras
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let image_folder = Path::new(&config.poller.image_folder);
        std::fs::create_dir_all(image_folder)
            .with_context(|| format!("Failed to create image folder {}", image_folder.display()))?;

        let registry = Arc::new(MemoryRegistry::new(config.daemon.publisher_id.clone()));
        let cameras = config.new_cameras();
        info!(count = cameras.len(), "Loading cameras from config");
        for camera in &cameras {
            registry.add_camera(camera);
        }

        let fetcher = Fetcher::new(config.poller.fetch_timeout())?;
        let poller = Arc::new(CameraPoller::new(registry.clone(), fetcher, image_folder));

        Ok(Arc::new(Self {
            registry,
            poller,
            config,
        }))
    }

    /// Tick-driven service polling every camera on its own interval
    pub fn poller_service(&self) -> PollerService<MemoryRegistry> {
        PollerService::new(
            self.poller.clone(),
            self.config.poller.scheduler,
            self.config.poller.tick(),
        )
    }

    /// Subscribe to publication events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishEvent> {
        self.registry.subscribe()
    }
}
