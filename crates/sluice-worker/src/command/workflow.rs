// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Drives a connector command from start to output.
//!
//! The workflow starts the command, then polls `is_terminal` with a sleep of
//! the command's await duration between polls. Cancellation is checked at
//! every sleep; a cancelled workflow cancels the underlying work before
//! returning.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::{CommandError, ConnectorCommand, ConnectorCommandInput, ConnectorJobOutput};
use super::failure::recover_start_failure;

/// Workflow errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WorkflowError {
    /// The workflow was cancelled; the started work was cancelled too.
    #[error("Command cancelled (id: {id})")]
    Cancelled {
        /// Id of the cancelled work, empty if nothing was started.
        id: String,
    },

    /// The command failed.
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// One handler per input variant.
#[derive(Clone)]
pub struct CommandSet {
    /// Handles [`ConnectorCommandInput::Check`].
    pub check: Arc<dyn ConnectorCommand>,
    /// Handles [`ConnectorCommandInput::Discover`].
    pub discover: Arc<dyn ConnectorCommand>,
    /// Handles [`ConnectorCommandInput::Spec`].
    pub spec: Arc<dyn ConnectorCommand>,
    /// Handles [`ConnectorCommandInput::Replication`].
    pub replication: Arc<dyn ConnectorCommand>,
    /// Handles the API-mediated variants.
    pub api: Arc<dyn ConnectorCommand>,
}

/// Runs connector commands.
#[derive(Clone)]
pub struct ConnectorCommandWorkflow {
    commands: CommandSet,
}

impl ConnectorCommandWorkflow {
    /// Create a workflow over a command set.
    pub fn new(commands: CommandSet) -> Self {
        Self { commands }
    }

    fn command_for(&self, input: &ConnectorCommandInput) -> &Arc<dyn ConnectorCommand> {
        match input {
            ConnectorCommandInput::Check(_) => &self.commands.check,
            ConnectorCommandInput::Discover(_) => &self.commands.discover,
            ConnectorCommandInput::Spec(_) => &self.commands.spec,
            ConnectorCommandInput::Replication(_) => &self.commands.replication,
            ConnectorCommandInput::ApiCheck(_) | ConnectorCommandInput::ApiDiscover(_) => {
                &self.commands.api
            }
        }
    }

    /// Run a command to completion.
    ///
    /// Start failures listed in the recoverable table produce a failed
    /// output instead of an error. Transient polling failures are retried
    /// at the next poll.
    #[instrument(skip(self, input, signal_payload, cancel), fields(kind = input.kind()))]
    pub async fn run(
        &self,
        input: ConnectorCommandInput,
        signal_payload: Option<String>,
        cancel: CancellationToken,
    ) -> Result<ConnectorJobOutput, WorkflowError> {
        let command = self.command_for(&input);
        let workflow_type = command.name();

        if cancel.is_cancelled() {
            return Err(WorkflowError::Cancelled { id: String::new() });
        }

        let id = match command.start(&input, signal_payload.as_deref()).await {
            Ok(id) => id,
            Err(e) => {
                return match recover_start_failure(&e, workflow_type, input.output_type()) {
                    Some(output) => {
                        warn!(error = %e, workflow_type, "Start failed, reporting failed output");
                        Ok(output)
                    }
                    None => {
                        error!(error = %e, workflow_type, "Start failed");
                        Err(e.into())
                    }
                };
            }
        };
        info!(id = %id, workflow_type, "Command started");

        loop {
            match command.is_terminal(&id).await {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) if e.is_retryable() => {
                    warn!(id = %id, error = %e, "Polling failed, retrying");
                }
                Err(e) => return Err(e.into()),
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(id = %id, "Workflow cancelled, cancelling command");
                    if let Err(e) = command.cancel(&id).await {
                        error!(id = %id, error = %e, "Failed to cancel command");
                    }
                    return Err(WorkflowError::Cancelled { id });
                }
                _ = tokio::time::sleep(command.await_duration()) => {}
            }
        }

        debug!(id = %id, "Command finished, reading output");
        Ok(command.get_output(&id).await?)
    }
}
