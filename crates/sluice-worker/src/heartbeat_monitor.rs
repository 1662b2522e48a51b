// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker-side heartbeat sender.
//!
//! While a connector runs, the worker heartbeats its workload at a fixed
//! interval. Two things raise the abort flag the connector loop polls:
//! - the API answers `Gone` or `NotFound` (the workload was cancelled,
//!   failed or deleted)
//! - heartbeats keep failing for longer than the heartbeat timeout
//!
//! A successful heartbeat clears the failure window.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{ClientError, WorkloadApiClient};

/// Configuration for the heartbeat sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatMonitorConfig {
    /// Time between heartbeats.
    pub interval: Duration,
    /// How long heartbeats may keep failing before the worker aborts.
    pub heartbeat_timeout: Duration,
}

impl Default for HeartbeatMonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(600),
        }
    }
}

/// Result of one heartbeat attempt, or of a finished heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// The heartbeat was accepted.
    Healthy,
    /// The heartbeat failed but the failure window is still open.
    Transient,
    /// The workload can no longer run; abort was requested.
    Gone,
    /// Heartbeats failed for longer than the timeout; abort was requested.
    TimedOut,
    /// The loop was stopped before any abort condition.
    Stopped,
}

/// Heartbeats one workload and decides when the worker must abort.
pub struct HeartbeatMonitor {
    client: Arc<dyn WorkloadApiClient>,
    workload_id: String,
    config: HeartbeatMonitorConfig,
    abort: Arc<AtomicBool>,
    first_failure: Option<Instant>,
}

impl HeartbeatMonitor {
    /// Create a monitor for one workload.
    pub fn new(
        client: Arc<dyn WorkloadApiClient>,
        workload_id: impl Into<String>,
        config: HeartbeatMonitorConfig,
    ) -> Self {
        Self {
            client,
            workload_id: workload_id.into(),
            config,
            abort: Arc::new(AtomicBool::new(false)),
            first_failure: None,
        }
    }

    /// Shared abort flag. Set once and never cleared.
    pub fn abort_flag(&self) -> Arc<AtomicBool> {
        self.abort.clone()
    }

    /// Whether the worker should stop the connector.
    pub fn should_abort(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    /// Send one heartbeat and update the failure window.
    pub async fn tick(&mut self) -> HeartbeatOutcome {
        match self.client.heartbeat(&self.workload_id).await {
            Ok(()) => {
                if self.first_failure.take().is_some() {
                    info!(workload_id = %self.workload_id, "Heartbeat recovered");
                }
                HeartbeatOutcome::Healthy
            }
            Err(ClientError::Gone(message) | ClientError::NotFound(message)) => {
                warn!(
                    workload_id = %self.workload_id,
                    reason = %message,
                    "Workload gone, aborting"
                );
                self.abort.store(true, Ordering::SeqCst);
                HeartbeatOutcome::Gone
            }
            Err(e) => {
                let now = Instant::now();
                let first = *self.first_failure.get_or_insert(now);
                let failing_for = now.duration_since(first);

                if failing_for > self.config.heartbeat_timeout {
                    error!(
                        workload_id = %self.workload_id,
                        error = %e,
                        failing_for_secs = failing_for.as_secs(),
                        "Heartbeats failing past timeout, aborting"
                    );
                    self.abort.store(true, Ordering::SeqCst);
                    HeartbeatOutcome::TimedOut
                } else {
                    warn!(
                        workload_id = %self.workload_id,
                        error = %e,
                        failing_for_secs = failing_for.as_secs(),
                        "Heartbeat failed"
                    );
                    HeartbeatOutcome::Transient
                }
            }
        }
    }

    /// Heartbeat until an abort condition or `shutdown` fires.
    pub async fn run(mut self, shutdown: CancellationToken) -> HeartbeatOutcome {
        debug!(
            workload_id = %self.workload_id,
            interval_secs = self.config.interval.as_secs(),
            "Heartbeat loop started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!(workload_id = %self.workload_id, "Heartbeat loop stopped");
                    return HeartbeatOutcome::Stopped;
                }
                _ = tokio::time::sleep(self.config.interval) => {}
            }

            match self.tick().await {
                outcome @ (HeartbeatOutcome::Gone | HeartbeatOutcome::TimedOut) => return outcome,
                HeartbeatOutcome::Healthy | HeartbeatOutcome::Transient => {}
                HeartbeatOutcome::Stopped => return HeartbeatOutcome::Stopped,
            }
        }
    }

    /// Run the loop on a background task.
    pub fn spawn(self) -> HeartbeatHandle {
        let abort = self.abort_flag();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(self.run(cancel.clone()));
        HeartbeatHandle {
            abort,
            cancel,
            task,
        }
    }
}

/// Handle to a spawned heartbeat loop.
pub struct HeartbeatHandle {
    abort: Arc<AtomicBool>,
    cancel: CancellationToken,
    task: JoinHandle<HeartbeatOutcome>,
}

impl HeartbeatHandle {
    /// Whether the worker should stop the connector.
    pub fn should_abort(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    /// Stop the loop and wait for it. `None` if the task panicked.
    pub async fn stop(self) -> Option<HeartbeatOutcome> {
        self.cancel.cancel();
        match self.task.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!("Heartbeat task failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use sluice_core::persistence::{WorkloadRecord, WorkloadStatus, WorkloadType};
    use sluice_core::workload_handlers::CreateWorkloadRequest;

    /// Client whose heartbeat answers come from a script; the last answer repeats.
    struct ScriptedClient {
        answers: Mutex<VecDeque<Result<(), ClientError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedClient {
        fn new(answers: Vec<Result<(), ClientError>>) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl WorkloadApiClient for ScriptedClient {
        async fn create(&self, _: CreateWorkloadRequest) -> Result<(), ClientError> {
            unimplemented!()
        }
        async fn get(&self, _: &str) -> Result<WorkloadRecord, ClientError> {
            unimplemented!()
        }
        async fn claim(&self, _: &str, _: &str) -> Result<bool, ClientError> {
            unimplemented!()
        }
        async fn heartbeat(&self, _: &str) -> Result<(), ClientError> {
            *self.calls.lock().unwrap() += 1;
            let mut answers = self.answers.lock().unwrap();
            if answers.len() > 1 {
                answers.pop_front().unwrap()
            } else {
                answers.front().cloned().unwrap()
            }
        }
        async fn launched(&self, _: &str) -> Result<(), ClientError> {
            unimplemented!()
        }
        async fn running(&self, _: &str) -> Result<(), ClientError> {
            unimplemented!()
        }
        async fn cancel(&self, _: &str, _: &str, _: &str) -> Result<(), ClientError> {
            unimplemented!()
        }
        async fn fail(&self, _: &str, _: &str, _: &str) -> Result<(), ClientError> {
            unimplemented!()
        }
        async fn succeed(&self, _: &str) -> Result<(), ClientError> {
            unimplemented!()
        }
        async fn search(
            &self,
            _: &[String],
            _: &[WorkloadStatus],
            _: Option<WorkloadType>,
        ) -> Result<Vec<WorkloadRecord>, ClientError> {
            unimplemented!()
        }
    }

    fn config() -> HeartbeatMonitorConfig {
        HeartbeatMonitorConfig {
            interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(60),
        }
    }

    fn transport() -> Result<(), ClientError> {
        Err(ClientError::Transport("connection refused".to_string()))
    }

    #[tokio::test]
    async fn test_gone_aborts_immediately() {
        let client = ScriptedClient::new(vec![Err(ClientError::Gone("cancelled".to_string()))]);
        let mut monitor = HeartbeatMonitor::new(client, "w1", config());

        assert_eq!(monitor.tick().await, HeartbeatOutcome::Gone);
        assert!(monitor.should_abort());
    }

    #[tokio::test]
    async fn test_missing_workload_aborts_immediately() {
        let client = ScriptedClient::new(vec![Err(ClientError::from_status(404, "deleted"))]);
        let mut monitor = HeartbeatMonitor::new(client, "w1", config());

        assert_eq!(monitor.tick().await, HeartbeatOutcome::Gone);
        assert!(monitor.should_abort());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_within_timeout_do_not_abort() {
        let client = ScriptedClient::new(vec![transport()]);
        let mut monitor = HeartbeatMonitor::new(client, "w1", config());

        assert_eq!(monitor.tick().await, HeartbeatOutcome::Transient);
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(monitor.tick().await, HeartbeatOutcome::Transient);
        assert!(!monitor.should_abort());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(monitor.tick().await, HeartbeatOutcome::TimedOut);
        assert!(monitor.should_abort());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_window() {
        let client = ScriptedClient::new(vec![transport(), Ok(()), transport()]);
        let mut monitor = HeartbeatMonitor::new(client, "w1", config());

        assert_eq!(monitor.tick().await, HeartbeatOutcome::Transient);
        tokio::time::advance(Duration::from_secs(50)).await;
        assert_eq!(monitor.tick().await, HeartbeatOutcome::Healthy);

        tokio::time::advance(Duration::from_secs(50)).await;
        assert_eq!(monitor.tick().await, HeartbeatOutcome::Transient);
        tokio::time::advance(Duration::from_secs(50)).await;
        assert_eq!(monitor.tick().await, HeartbeatOutcome::Transient);
        assert!(!monitor.should_abort());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_loop_stops_on_gone() {
        let client = ScriptedClient::new(vec![
            Ok(()),
            Ok(()),
            Err(ClientError::Gone("failed".to_string())),
        ]);
        let handle = HeartbeatMonitor::new(client.clone(), "w1", config()).spawn();

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert!(handle.should_abort());
        assert_eq!(handle.stop().await, Some(HeartbeatOutcome::Gone));
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_loop_stops_on_request() {
        let client = ScriptedClient::new(vec![Ok(())]);
        let handle = HeartbeatMonitor::new(client, "w1", config()).spawn();

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(!handle.should_abort());
        assert_eq!(handle.stop().await, Some(HeartbeatOutcome::Stopped));
    }
}
