// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workload API client.
//!
//! [`WorkloadApiClient`] is the boundary between worker-side code and the
//! lifecycle handler. [`EmbeddedWorkloadClient`] calls a
//! [`WorkloadHandler`] in-process; remote transports implement the same
//! trait and map HTTP statuses through [`ClientError::from_status`].

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument};

use sluice_core::error::CoreError;
use sluice_core::persistence::{WorkloadRecord, WorkloadStatus, WorkloadType};
use sluice_core::workload_handlers::{CreateWorkloadRequest, WorkloadHandler};

/// Errors returned by workload API calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ClientError {
    /// The workload does not exist (404).
    #[error("Workload not found: {0}")]
    NotFound(String),

    /// The workload can no longer accept heartbeats (410).
    #[error("Workload gone: {0}")]
    Gone(String),

    /// A workload with the same id already exists (409).
    #[error("Workload conflict: {0}")]
    Conflict(String),

    /// The requested transition is not allowed from the current status (422).
    #[error("Invalid status transition: {0}")]
    InvalidStatusTransition(String),

    /// The request was malformed (400).
    #[error("Rejected: {0}")]
    Rejected(String),

    /// Transport or server failure; may succeed on retry.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl ClientError {
    /// Map an HTTP status code returned by a remote workload API.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            404 => Self::NotFound(message),
            409 => Self::Conflict(message),
            410 => Self::Gone(message),
            422 => Self::InvalidStatusTransition(message),
            400..=499 => Self::Rejected(message),
            _ => Self::Transport(message),
        }
    }

    /// Map an HTTP status code returned by a heartbeat call. Both 404 and 410
    /// mean the workload is gone.
    pub fn from_heartbeat_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            404 | 410 => Self::Gone(message.into()),
            _ => Self::from_status(status, message),
        }
    }

    /// Whether the call may succeed if repeated unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<CoreError> for ClientError {
    fn from(err: CoreError) -> Self {
        let message = err.to_string();
        match err {
            CoreError::WorkloadNotFound { .. } => Self::NotFound(message),
            CoreError::WorkloadAlreadyExists { .. } => Self::Conflict(message),
            CoreError::InvalidStatusTransition { .. } => Self::InvalidStatusTransition(message),
            CoreError::ValidationError { .. } => Self::Rejected(message),
            _ => Self::Transport(message),
        }
    }
}

/// Operations the worker performs against the workload API.
#[async_trait]
pub trait WorkloadApiClient: Send + Sync {
    /// Create a pending workload.
    async fn create(&self, request: CreateWorkloadRequest) -> Result<(), ClientError>;

    /// Fetch a workload.
    async fn get(&self, workload_id: &str) -> Result<WorkloadRecord, ClientError>;

    /// Claim a workload for a dataplane; `false` if another plane holds it.
    async fn claim(&self, workload_id: &str, dataplane_id: &str) -> Result<bool, ClientError>;

    /// Send a heartbeat. A workload that can no longer run answers `Gone`.
    async fn heartbeat(&self, workload_id: &str) -> Result<(), ClientError>;

    /// Mark a claimed workload launched.
    async fn launched(&self, workload_id: &str) -> Result<(), ClientError>;

    /// Mark a workload running.
    async fn running(&self, workload_id: &str) -> Result<(), ClientError>;

    /// Cancel a workload.
    async fn cancel(&self, workload_id: &str, source: &str, reason: &str)
    -> Result<(), ClientError>;

    /// Fail a workload.
    async fn fail(&self, workload_id: &str, source: &str, reason: &str) -> Result<(), ClientError>;

    /// Mark a workload successful.
    async fn succeed(&self, workload_id: &str) -> Result<(), ClientError>;

    /// Search workloads.
    async fn search(
        &self,
        dataplane_ids: &[String],
        statuses: &[WorkloadStatus],
        workload_type: Option<WorkloadType>,
    ) -> Result<Vec<WorkloadRecord>, ClientError>;
}

/// Workload client that calls the lifecycle handler in-process.
#[derive(Clone)]
pub struct EmbeddedWorkloadClient {
    handler: WorkloadHandler,
}

impl EmbeddedWorkloadClient {
    /// Create a client over a handler.
    pub fn new(handler: WorkloadHandler) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl WorkloadApiClient for EmbeddedWorkloadClient {
    async fn create(&self, request: CreateWorkloadRequest) -> Result<(), ClientError> {
        self.handler.create_workload(request).await?;
        Ok(())
    }

    async fn get(&self, workload_id: &str) -> Result<WorkloadRecord, ClientError> {
        Ok(self.handler.get_workload(workload_id).await?)
    }

    async fn claim(&self, workload_id: &str, dataplane_id: &str) -> Result<bool, ClientError> {
        Ok(self.handler.claim_workload(workload_id, dataplane_id).await?)
    }

    #[instrument(skip(self))]
    async fn heartbeat(&self, workload_id: &str) -> Result<(), ClientError> {
        match self.handler.heartbeat(workload_id, None).await {
            Ok(()) => Ok(()),
            Err(
                e @ (CoreError::WorkloadNotFound { .. }
                | CoreError::InvalidStatusTransition { .. }),
            ) => {
                debug!(error = %e, "Heartbeat rejected, workload gone");
                Err(ClientError::Gone(e.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn launched(&self, workload_id: &str) -> Result<(), ClientError> {
        Ok(self
            .handler
            .set_workload_status_to_launched(workload_id, None)
            .await?)
    }

    async fn running(&self, workload_id: &str) -> Result<(), ClientError> {
        Ok(self
            .handler
            .set_workload_status_to_running(workload_id, None)
            .await?)
    }

    async fn cancel(
        &self,
        workload_id: &str,
        source: &str,
        reason: &str,
    ) -> Result<(), ClientError> {
        Ok(self
            .handler
            .cancel_workload(workload_id, source, reason)
            .await?)
    }

    async fn fail(&self, workload_id: &str, source: &str, reason: &str) -> Result<(), ClientError> {
        Ok(self.handler.fail_workload(workload_id, source, reason).await?)
    }

    async fn succeed(&self, workload_id: &str) -> Result<(), ClientError> {
        Ok(self.handler.succeed_workload(workload_id).await?)
    }

    async fn search(
        &self,
        dataplane_ids: &[String],
        statuses: &[WorkloadStatus],
        workload_type: Option<WorkloadType>,
    ) -> Result<Vec<WorkloadRecord>, ClientError> {
        Ok(self
            .handler
            .get_workloads(dataplane_ids, statuses, workload_type)
            .await?)
    }
}
