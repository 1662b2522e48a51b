// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Connector commands.
//!
//! A command starts a unit of connector work (check, discover, spec,
//! replication), reports when it is finished and returns its output. Most
//! commands run as workloads; the API-mediated variants delegate to a
//! remote command service. [`ConnectorCommandWorkflow`] drives any of them
//! to completion.

mod api;
mod check;
mod discover;
mod failure;
mod launcher;
mod output;
mod replication;
mod spec;
mod workflow;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::client::ClientError;
use crate::error::ApiError;

pub use api::{ApiCommand, CommandApi};
pub use check::CheckCommand;
pub use discover::DiscoverCommand;
pub use failure::{FailureTemplate, RECOVERABLE_FAILURES, recover_start_failure};
pub use launcher::{WorkloadLauncher, WorkspaceApi, WorkspaceInfo};
pub use output::{
    CheckConnectionOutput, CheckStatus, ConnectorJobOutput, FailureOrigin, FailureReason,
    FailureType, FileWorkloadOutputReader, InMemoryWorkloadOutputReader, OutputType,
    WorkloadOutputReader, output_file_path,
};
pub use replication::ReplicationCommand;
pub use spec::SpecCommand;
pub use workflow::{CommandSet, ConnectorCommandWorkflow, WorkflowError};

/// Input of a connection check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckCommandInput {
    /// Workspace owning the actor.
    pub workspace_id: Uuid,
    /// Source or destination being checked; `None` for unsaved configs.
    pub actor_id: Option<Uuid>,
    /// Job the check belongs to.
    pub job_id: String,
    /// Attempt of that job.
    pub attempt_number: i64,
    /// Connector image.
    pub docker_image: String,
    /// Connector configuration.
    pub connection_configuration: Value,
}

/// Input of a schema discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverCommandInput {
    /// Workspace owning the actor.
    pub workspace_id: Uuid,
    /// Source being discovered.
    pub actor_id: Uuid,
    /// Job the discovery belongs to.
    pub job_id: String,
    /// Attempt of that job.
    pub attempt_number: i64,
    /// Connector image.
    pub docker_image: String,
    /// Connector configuration.
    pub connection_configuration: Value,
}

/// Input of a spec fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecCommandInput {
    /// Job the spec fetch belongs to.
    pub job_id: String,
    /// Attempt of that job.
    pub attempt_number: i64,
    /// Connector image.
    pub docker_image: String,
}

/// Input of a sync attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationCommandInput {
    /// Workspace owning the connection.
    pub workspace_id: Uuid,
    /// Connection being synced.
    pub connection_id: Uuid,
    /// Sync job.
    pub job_id: i64,
    /// Attempt of that job.
    pub attempt_number: i64,
    /// Sync configuration handed to the replication workload.
    pub sync_config: Value,
}

/// Input of a check run by the command service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCheckInput {
    /// Actor being checked.
    pub actor_id: Uuid,
    /// Job the check belongs to.
    pub job_id: String,
    /// Attempt of that job.
    pub attempt_number: i64,
}

/// Input of a discovery run by the command service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiDiscoverInput {
    /// Source being discovered.
    pub actor_id: Uuid,
    /// Job the discovery belongs to.
    pub job_id: String,
    /// Attempt of that job.
    pub attempt_number: i64,
}

/// Input of any connector command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "input", rename_all = "snake_case")]
pub enum ConnectorCommandInput {
    /// Workload-backed connection check.
    Check(CheckCommandInput),
    /// Workload-backed discovery.
    Discover(DiscoverCommandInput),
    /// Workload-backed spec fetch.
    Spec(SpecCommandInput),
    /// Workload-backed sync attempt.
    Replication(ReplicationCommandInput),
    /// Check through the command service.
    ApiCheck(ApiCheckInput),
    /// Discovery through the command service.
    ApiDiscover(ApiDiscoverInput),
}

impl ConnectorCommandInput {
    /// Variant name, used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Check(_) => "check",
            Self::Discover(_) => "discover",
            Self::Spec(_) => "spec",
            Self::Replication(_) => "replication",
            Self::ApiCheck(_) => "api_check",
            Self::ApiDiscover(_) => "api_discover",
        }
    }

    /// Kind of output the command produces.
    pub fn output_type(&self) -> OutputType {
        match self {
            Self::Check(_) | Self::ApiCheck(_) => OutputType::CheckConnection,
            Self::Discover(_) | Self::ApiDiscover(_) => OutputType::DiscoverCatalogId,
            Self::Spec(_) => OutputType::Spec,
            Self::Replication(_) => OutputType::Replication,
        }
    }
}

/// Errors raised by connector commands.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CommandError {
    /// The workspace was deleted or never existed.
    #[error("Workspace not found: {workspace_id}")]
    WorkspaceNotFound {
        /// Workspace that was looked up.
        workspace_id: Uuid,
    },

    /// The command was handed an input of another kind.
    #[error("Command {command} cannot handle {input} input")]
    UnsupportedInput {
        /// Command name.
        command: &'static str,
        /// Input kind.
        input: &'static str,
    },

    /// Workload API failure.
    #[error("Workload API error: {0}")]
    Workload(#[from] ClientError),

    /// Workspace or command service failure.
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Payload could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The workload output could not be read.
    #[error("Failed to read output of workload {workload_id}: {message}")]
    Output {
        /// Workload whose output was read.
        workload_id: String,
        /// Read or parse failure.
        message: String,
    },
}

/// Discriminant of [`CommandError`], used as a lookup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandErrorKind {
    /// See [`CommandError::WorkspaceNotFound`].
    WorkspaceNotFound,
    /// See [`CommandError::UnsupportedInput`].
    UnsupportedInput,
    /// See [`CommandError::Workload`].
    Workload,
    /// See [`CommandError::Api`].
    Api,
    /// See [`CommandError::Serialization`].
    Serialization,
    /// See [`CommandError::Output`].
    Output,
}

impl CommandError {
    /// Discriminant of this error.
    pub fn kind(&self) -> CommandErrorKind {
        match self {
            Self::WorkspaceNotFound { .. } => CommandErrorKind::WorkspaceNotFound,
            Self::UnsupportedInput { .. } => CommandErrorKind::UnsupportedInput,
            Self::Workload(_) => CommandErrorKind::Workload,
            Self::Api(_) => CommandErrorKind::Api,
            Self::Serialization(_) => CommandErrorKind::Serialization,
            Self::Output { .. } => CommandErrorKind::Output,
        }
    }

    /// Whether repeating the call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Workload(e) => e.is_retryable(),
            Self::Api(ApiError::Other(_)) => true,
            _ => false,
        }
    }

    pub(crate) fn unsupported(command: &'static str, input: &ConnectorCommandInput) -> Self {
        Self::UnsupportedInput {
            command,
            input: input.kind(),
        }
    }
}

/// One kind of connector work.
#[async_trait]
pub trait ConnectorCommand: Send + Sync {
    /// Command name, also the workflow type in failure metadata.
    fn name(&self) -> &'static str;

    /// Start the work; returns the id to poll.
    async fn start(
        &self,
        input: &ConnectorCommandInput,
        signal_payload: Option<&str>,
    ) -> Result<String, CommandError>;

    /// Whether the work has finished.
    async fn is_terminal(&self, id: &str) -> Result<bool, CommandError>;

    /// Output of finished work.
    async fn get_output(&self, id: &str) -> Result<ConnectorJobOutput, CommandError>;

    /// Stop the work.
    async fn cancel(&self, id: &str) -> Result<(), CommandError>;

    /// Wait between `is_terminal` polls.
    fn await_duration(&self) -> Duration;
}
