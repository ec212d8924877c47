//! Maintenance Task
//!
//! Background maintenance of the runtime partition.
//!
//! A timer (or an administrative call) enqueues a `MaintenanceJob` on a
//! channel of capacity 1; one worker task consumes jobs in order, so passes
//! never overlap and a tick that finds a job already queued is coalesced.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::{GatewayError, Result};
use crate::lifecycle::{CacheLifecycleManager, MaintenanceReport};

/// What asked for a maintenance pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceTrigger {
    Timer,
    Admin,
}

impl fmt::Display for MaintenanceTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaintenanceTrigger::Timer => f.write_str("timer"),
            MaintenanceTrigger::Admin => f.write_str("admin"),
        }
    }
}

#[derive(Debug)]
pub struct MaintenanceJob {
    pub trigger: MaintenanceTrigger,
    /// Receives the report when the caller waits for it
    pub reply: Option<oneshot::Sender<Result<MaintenanceReport>>>,
}

// == Maintenance Handle ==
/// Sending side of the maintenance queue.
#[derive(Debug, Clone)]
pub struct MaintenanceHandle {
    jobs: mpsc::Sender<MaintenanceJob>,
}

impl MaintenanceHandle {
    /// Enqueues a pass without waiting. Returns false when a job is already
    /// queued (the request is coalesced into it) or the worker is gone.
    pub fn trigger(&self, trigger: MaintenanceTrigger) -> bool {
        self.jobs
            .try_send(MaintenanceJob {
                trigger,
                reply: None,
            })
            .is_ok()
    }

    /// Enqueues a pass and waits for its report.
    pub async fn request(&self, trigger: MaintenanceTrigger) -> Result<MaintenanceReport> {
        let (tx, rx) = oneshot::channel();
        self.jobs
            .send(MaintenanceJob {
                trigger,
                reply: Some(tx),
            })
            .await
            .map_err(|_| GatewayError::Internal("maintenance worker stopped".to_string()))?;

        rx.await
            .map_err(|_| GatewayError::Internal("maintenance worker dropped the job".to_string()))?
    }
}

/// Creates the bounded maintenance queue.
pub fn maintenance_channel() -> (MaintenanceHandle, mpsc::Receiver<MaintenanceJob>) {
    let (jobs, rx) = mpsc::channel(1);
    (MaintenanceHandle { jobs }, rx)
}

/// Spawns the single consumer of the maintenance queue.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
pub fn spawn_maintenance_worker(
    lifecycle: Arc<CacheLifecycleManager>,
    mut jobs: mpsc::Receiver<MaintenanceJob>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Maintenance worker started");

        while let Some(job) = jobs.recv().await {
            let result = lifecycle.maintain().await;
            match &result {
                Ok(report) if report.skipped => {
                    debug!(trigger = %job.trigger, "Maintenance pass skipped")
                }
                Ok(report) => debug!(
                    trigger = %job.trigger,
                    expired = report.expired,
                    trimmed = report.trimmed,
                    "Maintenance pass finished"
                ),
                Err(e) => error!(trigger = %job.trigger, error = %e, "Maintenance pass failed"),
            }

            if let Some(reply) = job.reply {
                let _ = reply.send(result);
            }
        }

        debug!("Maintenance queue closed");
    })
}

/// Spawns a task that enqueues a maintenance pass every `interval_secs`.
///
/// # Arguments
/// * `handle` - Queue the timer feeds
/// * `interval_secs` - Interval in seconds between passes
pub fn spawn_maintenance_timer(handle: MaintenanceHandle, interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            "Starting maintenance timer with interval of {} seconds",
            interval.as_secs()
        );

        loop {
            tokio::time::sleep(interval).await;

            if !handle.trigger(MaintenanceTrigger::Timer) {
                debug!("Maintenance already queued, tick coalesced");
            }
        }
    })
}
