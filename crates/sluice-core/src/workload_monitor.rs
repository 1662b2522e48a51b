// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker that resolves workloads whose deadline has passed.
//!
//! Each non-terminal status carries a deadline: pending workloads must be
//! claimed, claimed/launched workloads must start, running workloads must keep
//! heartbeating. When a deadline lapses the monitor ends the workload:
//!
//! - pending: cancelled ("not claimed before deadline")
//! - claimed / launched: failed ("not started before deadline")
//! - running: failed ("no heartbeat before deadline")

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::error::CoreError;
use crate::persistence::WorkloadStatus;
use crate::workload_handlers::WorkloadHandler;

/// Termination source recorded by the monitor.
pub const WORKLOAD_MONITOR_SOURCE: &str = "workload-monitor";

/// Configuration for the deadline monitor.
#[derive(Debug, Clone)]
pub struct WorkloadMonitorConfig {
    /// How often to sweep for expired workloads.
    pub poll_interval: Duration,
}

impl Default for WorkloadMonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
        }
    }
}

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Pending workloads cancelled.
    pub cancelled: usize,
    /// Started workloads failed.
    pub failed: usize,
    /// Workloads that could not be resolved this sweep.
    pub errors: usize,
}

/// Background worker that expires workloads past their deadline.
pub struct WorkloadMonitor {
    handler: WorkloadHandler,
    config: WorkloadMonitorConfig,
    shutdown: Arc<Notify>,
}

impl WorkloadMonitor {
    /// Create a new deadline monitor.
    pub fn new(handler: WorkloadHandler, config: WorkloadMonitorConfig) -> Self {
        Self {
            handler,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the sweep loop until the shutdown handle is notified.
    pub async fn run(&self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Workload deadline monitor started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Workload deadline monitor received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.check_expired_workloads().await {
                        error!(error = %e, "Failed to check expired workloads");
                    }
                }
            }
        }

        info!("Workload deadline monitor stopped");
    }

    /// Resolve every active workload whose deadline has passed.
    ///
    /// A failure on one workload is logged and counted; the sweep continues.
    /// Workloads claimed or heartbeated after the search are left alone.
    pub async fn check_expired_workloads(&self) -> Result<SweepSummary, CoreError> {
        let now = Utc::now();
        let expired = self
            .handler
            .get_workloads_with_expired_deadline(&[], &WorkloadStatus::ACTIVE, now)
            .await?;

        if expired.is_empty() {
            debug!("No expired workloads found");
            return Ok(SweepSummary::default());
        }

        info!(count = expired.len(), "Found expired workloads");

        let mut summary = SweepSummary::default();
        for workload in expired {
            match self
                .handler
                .expire_workload(&workload.id, WORKLOAD_MONITOR_SOURCE, now)
                .await
            {
                Ok(Some(WorkloadStatus::Cancelled)) => summary.cancelled += 1,
                Ok(Some(_)) => summary.failed += 1,
                Ok(None) => {
                    debug!(
                        workload_id = %workload.id,
                        "Workload moved on since the search, skipping"
                    );
                }
                Err(e) => {
                    summary.errors += 1;
                    error!(
                        workload_id = %workload.id,
                        error = %e,
                        "Failed to expire workload"
                    );
                }
            }
        }

        Ok(summary)
    }
}
