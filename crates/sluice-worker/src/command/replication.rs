// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workload-backed sync attempt.
//!
//! Sync workloads carry the connection id as mutex key, so starting a new
//! attempt cancels any attempt of the same connection still active.

use std::time::Duration;

use async_trait::async_trait;

use sluice_core::persistence::{WorkloadLabel, WorkloadType};
use sluice_core::workload_handlers::CreateWorkloadRequest;

use super::{
    CommandError, ConnectorCommand, ConnectorCommandInput, ConnectorJobOutput, OutputType,
    ReplicationCommandInput, WorkloadLauncher,
};

/// Runs a sync attempt as a workload.
pub struct ReplicationCommand {
    launcher: WorkloadLauncher,
}

impl ReplicationCommand {
    /// Create the command.
    pub fn new(launcher: WorkloadLauncher) -> Self {
        Self { launcher }
    }

    /// Workload id of a sync attempt.
    pub fn workload_id(input: &ReplicationCommandInput) -> String {
        format!(
            "{}_{}_{}_sync",
            input.connection_id, input.job_id, input.attempt_number
        )
    }
}

#[async_trait]
impl ConnectorCommand for ReplicationCommand {
    fn name(&self) -> &'static str {
        "replication"
    }

    async fn start(
        &self,
        input: &ConnectorCommandInput,
        signal_payload: Option<&str>,
    ) -> Result<String, CommandError> {
        let ConnectorCommandInput::Replication(input) = input else {
            return Err(CommandError::unsupported(self.name(), input));
        };

        let geography = self.launcher.geography(input.workspace_id).await?;
        let mut request = CreateWorkloadRequest::new(
            Self::workload_id(input),
            WorkloadType::Sync,
            serde_json::to_string(input)?,
        );
        request.labels = vec![
            WorkloadLabel::new("workspace_id", input.workspace_id.to_string()),
            WorkloadLabel::new("connection_id", input.connection_id.to_string()),
            WorkloadLabel::new("job_id", input.job_id.to_string()),
            WorkloadLabel::new("attempt_number", input.attempt_number.to_string()),
        ];
        request.geography = geography;
        request.mutex_key = Some(input.connection_id.to_string());
        request.signal_input = signal_payload.map(str::to_string);

        self.launcher.launch(request).await
    }

    async fn is_terminal(&self, id: &str) -> Result<bool, CommandError> {
        self.launcher.is_terminal(id).await
    }

    async fn get_output(&self, id: &str) -> Result<ConnectorJobOutput, CommandError> {
        self.launcher.output(id, OutputType::Replication).await
    }

    async fn cancel(&self, id: &str) -> Result<(), CommandError> {
        self.launcher.cancel(id, "sync cancelled").await
    }

    fn await_duration(&self) -> Duration {
        self.launcher.await_duration()
    }
}
