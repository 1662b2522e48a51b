// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workload-backed connection check.

use std::time::Duration;

use async_trait::async_trait;

use sluice_core::persistence::{WorkloadLabel, WorkloadType};
use sluice_core::workload_handlers::CreateWorkloadRequest;

use super::{
    CheckCommandInput, CommandError, ConnectorCommand, ConnectorCommandInput, ConnectorJobOutput,
    OutputType, WorkloadLauncher,
};

/// Runs a connection check as a workload.
pub struct CheckCommand {
    launcher: WorkloadLauncher,
}

impl CheckCommand {
    /// Create the command.
    pub fn new(launcher: WorkloadLauncher) -> Self {
        Self { launcher }
    }

    /// Workload id of a check attempt.
    pub fn workload_id(input: &CheckCommandInput) -> String {
        let actor = input
            .actor_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "unsaved".to_string());
        format!("{}_{}_{}_check", actor, input.job_id, input.attempt_number)
    }
}

#[async_trait]
impl ConnectorCommand for CheckCommand {
    fn name(&self) -> &'static str {
        "check"
    }

    async fn start(
        &self,
        input: &ConnectorCommandInput,
        signal_payload: Option<&str>,
    ) -> Result<String, CommandError> {
        let ConnectorCommandInput::Check(input) = input else {
            return Err(CommandError::unsupported(self.name(), input));
        };

        let geography = self.launcher.geography(input.workspace_id).await?;
        let mut request = CreateWorkloadRequest::new(
            Self::workload_id(input),
            WorkloadType::Check,
            serde_json::to_string(input)?,
        );
        request.labels = vec![
            WorkloadLabel::new("workspace_id", input.workspace_id.to_string()),
            WorkloadLabel::new("job_id", input.job_id.clone()),
            WorkloadLabel::new("attempt_number", input.attempt_number.to_string()),
        ];
        if let Some(actor_id) = input.actor_id {
            request.labels.push(WorkloadLabel::new("actor_id", actor_id.to_string()));
        }
        request.geography = geography;
        request.signal_input = signal_payload.map(str::to_string);

        self.launcher.launch(request).await
    }

    async fn is_terminal(&self, id: &str) -> Result<bool, CommandError> {
        self.launcher.is_terminal(id).await
    }

    async fn get_output(&self, id: &str) -> Result<ConnectorJobOutput, CommandError> {
        self.launcher.output(id, OutputType::CheckConnection).await
    }

    async fn cancel(&self, id: &str) -> Result<(), CommandError> {
        self.launcher.cancel(id, "check cancelled").await
    }

    fn await_duration(&self) -> Duration {
        self.launcher.await_duration()
    }
}
