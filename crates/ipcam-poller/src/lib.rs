//! ipcam Poller - Camera image polling and publication
//!
//! This crate provides:
//! - HTTP(S) image fetching with optional basic authentication
//! - Per-camera countdown scheduling on a fixed tick
//! - Polling a camera and publishing its image, latency and health
//! - Applying configuration change requests

pub mod config_handler;
pub mod fetch;
pub mod poll;
pub mod scheduler;
pub mod service;

#[cfg(test)]
mod test_support;

pub use config_handler::handle_config_change;
pub use fetch::{FetchError, FetchedImage, Fetcher, DEFAULT_FETCH_TIMEOUT_SECS};
pub use poll::{CameraPoller, PollError};
pub use scheduler::{InFlight, InFlightGuard, InitialPoll, OverlapPolicy, PollTicket, Scheduler, SchedulerConfig};
pub use service::{PollerService, DEFAULT_TICK};
