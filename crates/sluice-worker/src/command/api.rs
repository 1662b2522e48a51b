// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Checks and discoveries run by a remote command service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use super::{CommandError, ConnectorCommand, ConnectorCommandInput, ConnectorJobOutput};
use crate::error::ApiError;

/// Remote command service.
#[async_trait]
pub trait CommandApi: Send + Sync {
    /// Submit a command under `command_id`. Resubmitting an id is a no-op.
    async fn run_command(
        &self,
        command_id: &str,
        kind: &str,
        input: Value,
        signal_payload: Option<&str>,
    ) -> Result<(), ApiError>;

    /// Whether the command finished.
    async fn is_terminal(&self, command_id: &str) -> Result<bool, ApiError>;

    /// Output of a finished command.
    async fn get_output(&self, command_id: &str) -> Result<ConnectorJobOutput, ApiError>;

    /// Cancel a command.
    async fn cancel(&self, command_id: &str) -> Result<(), ApiError>;
}

/// Handles [`ConnectorCommandInput::ApiCheck`] and
/// [`ConnectorCommandInput::ApiDiscover`].
pub struct ApiCommand {
    api: Arc<dyn CommandApi>,
    await_duration: Duration,
}

impl ApiCommand {
    /// Create the command.
    pub fn new(api: Arc<dyn CommandApi>, await_duration: Duration) -> Self {
        Self {
            api,
            await_duration,
        }
    }

    /// Command id of an input, `None` for inputs this command does not run.
    pub fn command_id(input: &ConnectorCommandInput) -> Option<String> {
        match input {
            ConnectorCommandInput::ApiCheck(i) => {
                Some(format!("{}_{}_{}_check", i.actor_id, i.job_id, i.attempt_number))
            }
            ConnectorCommandInput::ApiDiscover(i) => {
                Some(format!("{}_{}_{}_discover", i.actor_id, i.job_id, i.attempt_number))
            }
            _ => None,
        }
    }
}

#[async_trait]
impl ConnectorCommand for ApiCommand {
    fn name(&self) -> &'static str {
        "api_command"
    }

    async fn start(
        &self,
        input: &ConnectorCommandInput,
        signal_payload: Option<&str>,
    ) -> Result<String, CommandError> {
        let (command_id, payload) = match input {
            ConnectorCommandInput::ApiCheck(i) => {
                (Self::command_id(input), serde_json::to_value(i)?)
            }
            ConnectorCommandInput::ApiDiscover(i) => {
                (Self::command_id(input), serde_json::to_value(i)?)
            }
            _ => (None, Value::Null),
        };
        let Some(command_id) = command_id else {
            return Err(CommandError::unsupported(self.name(), input));
        };

        self.api
            .run_command(&command_id, input.kind(), payload, signal_payload)
            .await?;
        info!(command_id = %command_id, kind = input.kind(), "Command submitted");
        Ok(command_id)
    }

    async fn is_terminal(&self, id: &str) -> Result<bool, CommandError> {
        Ok(self.api.is_terminal(id).await?)
    }

    async fn get_output(&self, id: &str) -> Result<ConnectorJobOutput, CommandError> {
        Ok(self.api.get_output(id).await?)
    }

    async fn cancel(&self, id: &str) -> Result<(), CommandError> {
        Ok(self.api.cancel(id).await?)
    }

    fn await_duration(&self) -> Duration {
        self.await_duration
    }
}
