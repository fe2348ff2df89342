//! Configuration loading and validation

use anyhow::{Context, Result};
use ipcam_core::{DeviceId, NewCamera, DEFAULT_POLL_INTERVAL};
use ipcam_poller::{SchedulerConfig, DEFAULT_FETCH_TIMEOUT_SECS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Shown instead of configured credentials
const REDACTED: &str = "********";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub cameras: BTreeMap<String, CameraConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Bind address for the HTTP API
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Publisher identity of this poller
    #[serde(default = "default_publisher_id")]
    pub publisher_id: String,
    /// TLS configuration (optional - enables HTTPS when present)
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            publisher_id: default_publisher_id(),
            tls: None,
        }
    }
}

/// TLS/HTTPS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM format)
    pub cert: String,
    /// Path to private key file (PEM format)
    pub key: String,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_publisher_id() -> String {
    ipcam_core::memory::DEFAULT_PUBLISHER_ID.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Scheduler tick in milliseconds
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
    /// Camera request timeout in seconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    /// Folder that camera `filename` paths are relative to
    #[serde(default = "default_image_folder")]
    pub image_folder: String,
    #[serde(flatten)]
    pub scheduler: SchedulerConfig,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            tick_millis: default_tick_millis(),
            fetch_timeout_secs: default_fetch_timeout(),
            image_folder: default_image_folder(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl PollerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis.max(1))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }
}

fn default_tick_millis() -> u64 {
    1000
}

fn default_fetch_timeout() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

fn default_image_folder() -> String {
    "./images".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Image URL, for example http://images.drivebc.ca/bchighwaycam/pub/cameras/2.jpg
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Seconds between polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval: i64,
    #[serde(default)]
    pub description: String,
    /// Save each image to this file in the image folder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

fn default_poll_interval() -> i64 {
    DEFAULT_POLL_INTERVAL
}

impl Config {
    /// Camera definitions for the registry
    pub fn new_cameras(&self) -> Vec<NewCamera> {
        self.cameras
            .iter()
            .map(|(id, cam)| NewCamera {
                id: DeviceId::new(id.clone()),
                url: cam.url.clone(),
                login: cam.login.clone(),
                password: cam.password.clone(),
                poll_interval: cam.poll_interval,
                description: cam.description.clone(),
                filename: cam.filename.clone(),
            })
            .collect()
    }

    /// Copy with camera credentials masked
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        for cam in config.cameras.values_mut() {
            if cam.login.is_some() {
                cam.login = Some(REDACTED.to_string());
            }
            if cam.password.is_some() {
                cam.password = Some(REDACTED.to_string());
            }
        }
        config
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.poller.scheduler = config.poller.scheduler.validated();
        info!(path = %path.display(), cameras = config.cameras.len(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Example configuration as TOML
pub fn default_config_toml() -> Result<String> {
    let mut config = Config::default();
    config.cameras.insert(
        "Snowshed-east".to_string(),
        CameraConfig {
            url: "http://images.drivebc.ca/bchighwaycam/pub/cameras/2.jpg".to_string(),
            login: None,
            password: None,
            poll_interval: 300,
            description: "Snowshed on Highway 1, looking east".to_string(),
            filename: Some("snowshed-east.jpg".to_string()),
        },
    );
    Ok(toml::to_string_pretty(&config)?)
}
