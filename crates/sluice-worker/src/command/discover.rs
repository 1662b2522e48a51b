// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workload-backed schema discovery.

use std::time::Duration;

use async_trait::async_trait;

use sluice_core::persistence::{WorkloadLabel, WorkloadType};
use sluice_core::workload_handlers::CreateWorkloadRequest;

use super::{
    CommandError, ConnectorCommand, ConnectorCommandInput, ConnectorJobOutput, DiscoverCommandInput,
    OutputType, WorkloadLauncher,
};

/// Runs a schema discovery as a workload.
pub struct DiscoverCommand {
    launcher: WorkloadLauncher,
}

impl DiscoverCommand {
    /// Create the command.
    pub fn new(launcher: WorkloadLauncher) -> Self {
        Self { launcher }
    }

    /// Workload id of a discovery attempt.
    pub fn workload_id(input: &DiscoverCommandInput) -> String {
        format!(
            "{}_{}_{}_discover",
            input.actor_id, input.job_id, input.attempt_number
        )
    }
}

#[async_trait]
impl ConnectorCommand for DiscoverCommand {
    fn name(&self) -> &'static str {
        "discover"
    }

    async fn start(
        &self,
        input: &ConnectorCommandInput,
        signal_payload: Option<&str>,
    ) -> Result<String, CommandError> {
        let ConnectorCommandInput::Discover(input) = input else {
            return Err(CommandError::unsupported(self.name(), input));
        };

        let geography = self.launcher.geography(input.workspace_id).await?;
        let mut request = CreateWorkloadRequest::new(
            Self::workload_id(input),
            WorkloadType::Discover,
            serde_json::to_string(input)?,
        );
        request.labels = vec![
            WorkloadLabel::new("workspace_id", input.workspace_id.to_string()),
            WorkloadLabel::new("actor_id", input.actor_id.to_string()),
            WorkloadLabel::new("job_id", input.job_id.clone()),
            WorkloadLabel::new("attempt_number", input.attempt_number.to_string()),
        ];
        request.geography = geography;
        request.signal_input = signal_payload.map(str::to_string);

        self.launcher.launch(request).await
    }

    async fn is_terminal(&self, id: &str) -> Result<bool, CommandError> {
        self.launcher.is_terminal(id).await
    }

    async fn get_output(&self, id: &str) -> Result<ConnectorJobOutput, CommandError> {
        self.launcher.output(id, OutputType::DiscoverCatalogId).await
    }

    async fn cancel(&self, id: &str) -> Result<(), CommandError> {
        self.launcher.cancel(id, "discover cancelled").await
    }

    fn await_duration(&self) -> Duration {
        self.launcher.await_duration()
    }
}
