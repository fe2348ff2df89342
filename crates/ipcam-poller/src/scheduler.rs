//! Per-camera poll scheduling
//!
//! The scheduler keeps one countdown per camera, in seconds until its next
//! poll. Every tick it decrements the countdowns; a camera whose countdown has
//! run out is due, and its countdown restarts from the camera's *current*
//! poll interval as read from the registry. Reading the interval at each
//! restart is what makes runtime interval changes take effect without any
//! extra signalling.
//!
//! [`Scheduler::tick`] only decides which cameras are due. Dispatching the
//! polls is up to the caller.

use ipcam_core::device::attr;
use ipcam_core::{CameraRegistry, DeviceId, DEFAULT_POLL_INTERVAL, MAX_POLL_INTERVAL, MIN_POLL_INTERVAL};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// When a newly seen camera is first polled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitialPoll {
    /// On the first tick
    #[default]
    Immediate,
    /// One full poll interval after it was first seen
    Interval,
}

/// What to do when a camera is due while its previous poll is still running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// Skip this poll; the countdown restarts as usual
    #[default]
    Skip,
    /// Start another poll alongside the running one
    Allow,
}

/// Scheduler settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub initial_poll: InitialPoll,
    #[serde(default)]
    pub overlap: OverlapPolicy,
    /// Interval used when a camera's own interval is missing or unusable
    #[serde(default = "default_interval")]
    pub default_interval_secs: i64,
}

fn default_interval() -> i64 {
    DEFAULT_POLL_INTERVAL
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            initial_poll: InitialPoll::default(),
            overlap: OverlapPolicy::default(),
            default_interval_secs: default_interval(),
        }
    }
}

impl SchedulerConfig {
    /// Copy with `default_interval_secs` clamped into the poll interval bounds
    pub fn validated(mut self) -> Self {
        let clamped = self
            .default_interval_secs
            .clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL);
        if clamped != self.default_interval_secs {
            warn!(
                configured = self.default_interval_secs,
                used = clamped,
                "Default poll interval out of range, clamped"
            );
            self.default_interval_secs = clamped;
        }
        self
    }
}

/// Set of cameras with a poll in progress. Clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct InFlight(Arc<Mutex<HashSet<DeviceId>>>);

impl InFlight {
    /// Mark `device` as being polled. Returns `None` if it already is.
    pub fn try_begin(&self, device: &DeviceId) -> Option<InFlightGuard> {
        let mut polling = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if polling.insert(device.clone()) {
            Some(InFlightGuard {
                set: self.clone(),
                device: device.clone(),
            })
        } else {
            None
        }
    }

    pub fn contains(&self, device: &DeviceId) -> bool {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(device)
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Clears the in-flight mark when dropped
#[derive(Debug)]
pub struct InFlightGuard {
    set: InFlight,
    device: DeviceId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.device);
    }
}

/// A poll the scheduler decided to start. Hold it until the poll finishes.
#[derive(Debug)]
pub struct PollTicket {
    pub device: DeviceId,
    _guard: Option<InFlightGuard>,
}

/// Countdown state for all cameras
#[derive(Debug, Default)]
pub struct Scheduler {
    config: SchedulerConfig,
    countdowns: HashMap<DeviceId, i64>,
    in_flight: InFlight,
}

impl Scheduler {
    /// `in_flight` is shared with every other poll source for the same cameras
    pub fn new(config: SchedulerConfig, in_flight: InFlight) -> Self {
        Self {
            config: config.validated(),
            countdowns: HashMap::new(),
            in_flight,
        }
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    /// Seconds until the next poll of `device`, if it is known
    pub fn countdown(&self, device: &DeviceId) -> Option<i64> {
        self.countdowns.get(device).copied()
    }

    /// Advance one tick and return the polls to start
    pub fn tick<R: CameraRegistry + ?Sized>(&mut self, registry: &R) -> Vec<PollTicket> {
        let devices = registry.list_devices();
        self.countdowns.retain(|id, _| devices.contains(id));

        let mut due = Vec::new();
        for device in devices {
            let countdown = match self.countdowns.get(&device) {
                Some(countdown) => *countdown,
                None => match self.config.initial_poll {
                    InitialPoll::Immediate => 0,
                    InitialPoll::Interval => {
                        let interval = self.poll_interval(registry, &device);
                        debug!(device = %device, interval = interval, "First poll scheduled after one interval");
                        self.countdowns.insert(device, interval);
                        continue;
                    }
                },
            };

            if countdown > 0 {
                self.countdowns.insert(device, countdown - 1);
                continue;
            }

            let interval = self.poll_interval(registry, &device);
            self.countdowns.insert(device.clone(), interval);

            match self.config.overlap {
                OverlapPolicy::Allow => {
                    debug!(device = %device, interval = interval, "Polling camera");
                    due.push(PollTicket { device, _guard: None });
                }
                OverlapPolicy::Skip => match self.in_flight.try_begin(&device) {
                    Some(guard) => {
                        debug!(device = %device, interval = interval, "Polling camera");
                        due.push(PollTicket {
                            device,
                            _guard: Some(guard),
                        });
                    }
                    None => {
                        debug!(device = %device, "Previous poll still running, skipping");
                    }
                },
            }
        }
        due
    }

    fn poll_interval<R: CameraRegistry + ?Sized>(&self, registry: &R, device: &DeviceId) -> i64 {
        let interval = registry.get_device_config_int(device, attr::POLL_INTERVAL, self.config.default_interval_secs);
        if interval > 0 {
            interval
        } else {
            self.config.default_interval_secs
        }
    }
}
