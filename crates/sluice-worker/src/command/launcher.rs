// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared plumbing for workload-backed commands.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use sluice_core::workload_handlers::CreateWorkloadRequest;

use super::{CommandError, ConnectorJobOutput, OutputType, WorkloadOutputReader};
use crate::client::{ClientError, WorkloadApiClient};
use crate::error::ApiError;

/// Termination source recorded when a command cancels its workload.
pub const CONNECTOR_COMMAND_SOURCE: &str = "connector-command";

/// Workspace details a command needs before launching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceInfo {
    /// Workspace id.
    pub workspace_id: Uuid,
    /// Region workloads of this workspace run in.
    pub geography: String,
    /// Soft-deleted.
    #[serde(default)]
    pub tombstone: bool,
}

/// Workspace lookup.
#[async_trait]
pub trait WorkspaceApi: Send + Sync {
    /// Fetch a workspace; `ApiError::NotFound` if it does not exist.
    async fn get_workspace(&self, workspace_id: Uuid) -> Result<WorkspaceInfo, ApiError>;
}

/// Creates, polls, reads and cancels the workload behind a command.
#[derive(Clone)]
pub struct WorkloadLauncher {
    client: Arc<dyn WorkloadApiClient>,
    workspaces: Arc<dyn WorkspaceApi>,
    outputs: Arc<dyn WorkloadOutputReader>,
    await_duration: Duration,
}

impl WorkloadLauncher {
    /// Create a launcher.
    pub fn new(
        client: Arc<dyn WorkloadApiClient>,
        workspaces: Arc<dyn WorkspaceApi>,
        outputs: Arc<dyn WorkloadOutputReader>,
        await_duration: Duration,
    ) -> Self {
        Self {
            client,
            workspaces,
            outputs,
            await_duration,
        }
    }

    /// Geography of a live workspace.
    pub async fn geography(&self, workspace_id: Uuid) -> Result<String, CommandError> {
        match self.workspaces.get_workspace(workspace_id).await {
            Ok(workspace) if !workspace.tombstone => Ok(workspace.geography),
            Ok(_) | Err(ApiError::NotFound(_)) => {
                Err(CommandError::WorkspaceNotFound { workspace_id })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Create the workload. An existing workload with the same id is
    /// reused, so restarting a command does not launch twice.
    pub async fn launch(&self, request: CreateWorkloadRequest) -> Result<String, CommandError> {
        let workload_id = request.id.clone();
        match self.client.create(request).await {
            Ok(()) => {
                info!(workload_id = %workload_id, "Workload created");
                Ok(workload_id)
            }
            Err(ClientError::Conflict(_)) => {
                debug!(workload_id = %workload_id, "Workload already exists, resuming");
                Ok(workload_id)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Whether the workload reached a terminal status.
    pub async fn is_terminal(&self, workload_id: &str) -> Result<bool, CommandError> {
        let workload = self.client.get(workload_id).await?;
        Ok(workload.status.is_terminal())
    }

    /// Output the workload left, or a platform failure when it left none.
    pub async fn output(
        &self,
        workload_id: &str,
        output_type: OutputType,
    ) -> Result<ConnectorJobOutput, CommandError> {
        match self.outputs.read_output(workload_id).await? {
            Some(output) => Ok(output),
            None => {
                warn!(workload_id = %workload_id, "Workload left no output");
                Ok(ConnectorJobOutput::missing(output_type, workload_id))
            }
        }
    }

    /// Cancel the workload. Already-finished workloads are left alone.
    pub async fn cancel(&self, workload_id: &str, reason: &str) -> Result<(), CommandError> {
        match self
            .client
            .cancel(workload_id, CONNECTOR_COMMAND_SOURCE, reason)
            .await
        {
            Ok(()) => Ok(()),
            Err(ClientError::InvalidStatusTransition(message)) => {
                debug!(workload_id = %workload_id, %message, "Workload already finished");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Wait between polls.
    pub fn await_duration(&self) -> Duration {
        self.await_duration
    }
}
