// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for sluice-worker integration tests.
//!
//! Wires worker components to an in-memory SQLite workload store and
//! provides a fake dataplane that drives workloads to completion.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use sluice_core::error::CoreError;
use sluice_core::persistence::{SqlitePersistence, WorkloadRecord, WorkloadStatus, WorkloadType};
use sluice_core::workload_handlers::{CreateWorkloadRequest, WorkloadHandler};
use sluice_worker::ApiError;
use sluice_worker::client::{ClientError, EmbeddedWorkloadClient, WorkloadApiClient};
use sluice_worker::command::{
    ApiCommand, CheckCommand, CheckConnectionOutput, CheckStatus, CommandApi, CommandSet,
    ConnectorCommandWorkflow, ConnectorJobOutput, DiscoverCommand, InMemoryWorkloadOutputReader,
    OutputType, ReplicationCommand, SpecCommand, WorkloadLauncher, WorkspaceApi, WorkspaceInfo,
};

/// Poll interval used by commands under test.
pub const AWAIT: Duration = Duration::from_millis(20);

/// Worker components over one in-memory store.
pub struct TestContext {
    pub handler: WorkloadHandler,
    pub client: Arc<EmbeddedWorkloadClient>,
    pub workspaces: Arc<StaticWorkspaces>,
    pub outputs: Arc<InMemoryWorkloadOutputReader>,
}

impl TestContext {
    pub async fn new() -> Self {
        let persistence = SqlitePersistence::in_memory()
            .await
            .expect("Failed to create in-memory SQLite persistence");
        let handler = WorkloadHandler::new(Arc::new(persistence));
        Self {
            client: Arc::new(EmbeddedWorkloadClient::new(handler.clone())),
            handler,
            workspaces: Arc::new(StaticWorkspaces::default()),
            outputs: Arc::new(InMemoryWorkloadOutputReader::new()),
        }
    }

    pub fn launcher(&self) -> WorkloadLauncher {
        self.launcher_with(self.client.clone())
    }

    pub fn launcher_with(&self, client: Arc<dyn WorkloadApiClient>) -> WorkloadLauncher {
        WorkloadLauncher::new(
            client,
            self.workspaces.clone(),
            self.outputs.clone(),
            AWAIT,
        )
    }

    /// Client that sees handler errors only as HTTP status codes.
    pub fn status_mapped_client(&self) -> Arc<StatusMappedClient> {
        Arc::new(StatusMappedClient {
            handler: self.handler.clone(),
        })
    }

    /// Register a live workspace.
    pub fn add_workspace(&self, geography: &str) -> Uuid {
        let workspace_id = Uuid::new_v4();
        self.workspaces.insert(WorkspaceInfo {
            workspace_id,
            geography: geography.to_string(),
            tombstone: false,
        });
        workspace_id
    }

    /// Run one pending workload of `workload_type` to success, publishing
    /// `output` first. Gives up after about two seconds.
    pub async fn complete_next(
        &self,
        workload_type: WorkloadType,
        output: ConnectorJobOutput,
    ) -> Option<String> {
        for _ in 0..100 {
            let pending = self
                .handler
                .get_workloads(&[], &[WorkloadStatus::Pending], Some(workload_type))
                .await
                .ok()?;
            if let Some(workload) = pending.into_iter().next() {
                let id = workload.id;
                assert!(self.handler.claim_workload(&id, "plane-test").await.ok()?);
                self.handler
                    .set_workload_status_to_launched(&id, None)
                    .await
                    .ok()?;
                self.handler
                    .set_workload_status_to_running(&id, None)
                    .await
                    .ok()?;
                self.outputs.insert(id.clone(), output);
                self.handler.succeed_workload(&id).await.ok()?;
                return Some(id);
            }
            tokio::time::sleep(AWAIT).await;
        }
        None
    }
}

/// Workspace lookup backed by a map.
#[derive(Default)]
pub struct StaticWorkspaces {
    workspaces: Mutex<HashMap<Uuid, WorkspaceInfo>>,
}

impl StaticWorkspaces {
    pub fn insert(&self, workspace: WorkspaceInfo) {
        self.workspaces
            .lock()
            .unwrap()
            .insert(workspace.workspace_id, workspace);
    }
}

#[async_trait]
impl WorkspaceApi for StaticWorkspaces {
    async fn get_workspace(&self, workspace_id: Uuid) -> Result<WorkspaceInfo, ApiError> {
        self.workspaces
            .lock()
            .unwrap()
            .get(&workspace_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("workspace {}", workspace_id)))
    }
}

/// Command service that finishes every command on the first poll.
#[derive(Default)]
pub struct InstantCommandApi {
    pub submitted: Mutex<Vec<(String, String)>>,
    pub cancelled: Mutex<Vec<String>>,
}

#[async_trait]
impl CommandApi for InstantCommandApi {
    async fn run_command(
        &self,
        command_id: &str,
        kind: &str,
        _input: serde_json::Value,
        _signal_payload: Option<&str>,
    ) -> Result<(), ApiError> {
        self.submitted
            .lock()
            .unwrap()
            .push((command_id.to_string(), kind.to_string()));
        Ok(())
    }

    async fn is_terminal(&self, _command_id: &str) -> Result<bool, ApiError> {
        Ok(true)
    }

    async fn get_output(&self, _command_id: &str) -> Result<ConnectorJobOutput, ApiError> {
        let mut output = ConnectorJobOutput::new(OutputType::CheckConnection);
        output.check_connection = Some(CheckConnectionOutput {
            status: CheckStatus::Succeeded,
            message: None,
        });
        Ok(output)
    }

    async fn cancel(&self, command_id: &str) -> Result<(), ApiError> {
        self.cancelled.lock().unwrap().push(command_id.to_string());
        Ok(())
    }
}

/// Workflow over the context's workload-backed commands and `api`.
pub fn workflow(ctx: &TestContext, api: Arc<dyn CommandApi>) -> ConnectorCommandWorkflow {
    ConnectorCommandWorkflow::new(CommandSet {
        check: Arc::new(CheckCommand::new(ctx.launcher())),
        discover: Arc::new(DiscoverCommand::new(ctx.launcher())),
        spec: Arc::new(SpecCommand::new(ctx.launcher())),
        replication: Arc::new(ReplicationCommand::new(ctx.launcher())),
        api: Arc::new(ApiCommand::new(api, AWAIT)),
    })
}

/// Workload client that passes every handler error through its HTTP status,
/// the way a remote transport sees it.
pub struct StatusMappedClient {
    handler: WorkloadHandler,
}

fn over_http(err: CoreError) -> ClientError {
    ClientError::from_status(err.http_status(), err.to_string())
}

#[async_trait]
impl WorkloadApiClient for StatusMappedClient {
    async fn create(&self, request: CreateWorkloadRequest) -> Result<(), ClientError> {
        self.handler.create_workload(request).await.map_err(over_http)?;
        Ok(())
    }

    async fn get(&self, workload_id: &str) -> Result<WorkloadRecord, ClientError> {
        self.handler
            .get_workload(workload_id)
            .await
            .map_err(over_http)
    }

    async fn claim(&self, workload_id: &str, dataplane_id: &str) -> Result<bool, ClientError> {
        self.handler
            .claim_workload(workload_id, dataplane_id)
            .await
            .map_err(over_http)
    }

    async fn heartbeat(&self, workload_id: &str) -> Result<(), ClientError> {
        self.handler
            .heartbeat(workload_id, None)
            .await
            .map_err(|e| {
                ClientError::from_heartbeat_status(e.heartbeat_http_status(), e.to_string())
            })
    }

    async fn launched(&self, workload_id: &str) -> Result<(), ClientError> {
        self.handler
            .set_workload_status_to_launched(workload_id, None)
            .await
            .map_err(over_http)
    }

    async fn running(&self, workload_id: &str) -> Result<(), ClientError> {
        self.handler
            .set_workload_status_to_running(workload_id, None)
            .await
            .map_err(over_http)
    }

    async fn cancel(
        &self,
        workload_id: &str,
        source: &str,
        reason: &str,
    ) -> Result<(), ClientError> {
        self.handler
            .cancel_workload(workload_id, source, reason)
            .await
            .map_err(over_http)
    }

    async fn fail(&self, workload_id: &str, source: &str, reason: &str) -> Result<(), ClientError> {
        self.handler
            .fail_workload(workload_id, source, reason)
            .await
            .map_err(over_http)
    }

    async fn succeed(&self, workload_id: &str) -> Result<(), ClientError> {
        self.handler
            .succeed_workload(workload_id)
            .await
            .map_err(over_http)
    }

    async fn search(
        &self,
        dataplane_ids: &[String],
        statuses: &[WorkloadStatus],
        workload_type: Option<WorkloadType>,
    ) -> Result<Vec<WorkloadRecord>, ClientError> {
        self.handler
            .get_workloads(dataplane_ids, statuses, workload_type)
            .await
            .map_err(over_http)
    }
}
