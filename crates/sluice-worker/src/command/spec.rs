// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workload-backed connector spec fetch. Not tied to a workspace.

use std::time::Duration;

use async_trait::async_trait;

use sluice_core::persistence::{WorkloadLabel, WorkloadType};
use sluice_core::workload_handlers::CreateWorkloadRequest;

use super::{
    CommandError, ConnectorCommand, ConnectorCommandInput, ConnectorJobOutput, OutputType,
    SpecCommandInput, WorkloadLauncher,
};

/// Runs a spec fetch as a workload.
pub struct SpecCommand {
    launcher: WorkloadLauncher,
}

impl SpecCommand {
    /// Create the command.
    pub fn new(launcher: WorkloadLauncher) -> Self {
        Self { launcher }
    }

    /// Workload id of a spec attempt.
    pub fn workload_id(input: &SpecCommandInput) -> String {
        format!("{}_{}_spec", input.job_id, input.attempt_number)
    }
}

#[async_trait]
impl ConnectorCommand for SpecCommand {
    fn name(&self) -> &'static str {
        "spec"
    }

    async fn start(
        &self,
        input: &ConnectorCommandInput,
        signal_payload: Option<&str>,
    ) -> Result<String, CommandError> {
        let ConnectorCommandInput::Spec(input) = input else {
            return Err(CommandError::unsupported(self.name(), input));
        };

        let mut request = CreateWorkloadRequest::new(
            Self::workload_id(input),
            WorkloadType::Spec,
            serde_json::to_string(input)?,
        );
        request.labels = vec![
            WorkloadLabel::new("job_id", input.job_id.clone()),
            WorkloadLabel::new("attempt_number", input.attempt_number.to_string()),
            WorkloadLabel::new("docker_image", input.docker_image.clone()),
        ];
        request.signal_input = signal_payload.map(str::to_string);

        self.launcher.launch(request).await
    }

    async fn is_terminal(&self, id: &str) -> Result<bool, CommandError> {
        self.launcher.is_terminal(id).await
    }

    async fn get_output(&self, id: &str) -> Result<ConnectorJobOutput, CommandError> {
        self.launcher.output(id, OutputType::Spec).await
    }

    async fn cancel(&self, id: &str) -> Result<(), CommandError> {
        self.launcher.cancel(id, "spec cancelled").await
    }

    fn await_duration(&self) -> Duration {
        self.launcher.await_duration()
    }
}
