//! Tick-driven poller service
//!
//! Runs the [`Scheduler`] on a fixed tick and starts every due poll as its
//! own task. The tick never waits for a poll, so a slow camera cannot delay
//! the others. Stopping the service stops the tick; polls already started are
//! left to finish on their own.

use ipcam_core::{CameraRegistry, DeviceId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::poll::{CameraPoller, PollError};
use crate::scheduler::{PollTicket, Scheduler, SchedulerConfig};

/// Scheduler tick used when none is configured
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

pub struct PollerService<R: CameraRegistry + ?Sized> {
    poller: Arc<CameraPoller<R>>,
    scheduler: Scheduler,
    tick: Duration,
}

impl<R: CameraRegistry + ?Sized> PollerService<R> {
    pub fn new(poller: Arc<CameraPoller<R>>, config: SchedulerConfig, tick: Duration) -> Self {
        let scheduler = Scheduler::new(config, poller.in_flight().clone());
        Self {
            poller,
            scheduler,
            tick,
        }
    }

    /// Run until `shutdown` becomes true or its sender is dropped
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            tick_ms = self.tick.as_millis() as u64,
            cameras = self.poller.registry().list_devices().len(),
            "Poller started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let registry = self.poller.registry().clone();
                    for ticket in self.scheduler.tick(&*registry) {
                        dispatch(self.poller.clone(), ticket);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(in_flight = self.scheduler.in_flight().len(), "Poller stopped");
    }

    /// Poll every camera once, concurrently, and wait for all results
    pub async fn poll_all_once(&self) -> Vec<(DeviceId, Result<Vec<u8>, PollError>)> {
        let mut tasks = JoinSet::new();
        for device in self.poller.registry().list_devices() {
            let poller = self.poller.clone();
            tasks.spawn(async move {
                let result = poller.poll_camera(&device).await;
                (device, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!(error = %e, "Poll task failed"),
            }
        }
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }
}

/// Start a poll without waiting for it
fn dispatch<R: CameraRegistry + ?Sized>(poller: Arc<CameraPoller<R>>, ticket: PollTicket) {
    tokio::spawn(async move {
        match poller.poll_camera(&ticket.device).await {
            Ok(image) => debug!(device = %ticket.device, size = image.len(), "Poll complete"),
            Err(e @ PollError::Fetch { .. }) => warn!(device = %ticket.device, error = %e, "Poll failed"),
            Err(e @ PollError::Save { .. }) => warn!(device = %ticket.device, error = %e, "Poll image not saved"),
        }
        drop(ticket);
    });
}
