// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Connector job output.
//!
//! A finished workload leaves an `output.json` document under
//! `<data_dir>/<workload_id>/`. The command workflow reads it back as a
//! [`ConnectorJobOutput`].

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::CommandError;

/// Kind of connector job that produced an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    /// Connection check.
    CheckConnection,
    /// Schema discovery.
    DiscoverCatalogId,
    /// Connector specification.
    Spec,
    /// Data replication.
    Replication,
}

/// Result of a connection check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    /// The connector reached the system.
    Succeeded,
    /// The connector could not reach the system.
    Failed,
}

/// Connection check details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckConnectionOutput {
    /// Check verdict.
    pub status: CheckStatus,
    /// Connector message, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Component a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureOrigin {
    /// Source connector.
    Source,
    /// Destination connector.
    Destination,
    /// Replication orchestration.
    Replication,
    /// The platform itself.
    AirbytePlatform,
    /// Not determined.
    Unknown,
}

/// Broad failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    /// User-correctable configuration problem.
    ConfigError,
    /// Platform-side failure.
    SystemError,
    /// Cancelled by a user.
    ManualCancellation,
    /// Expected to pass on retry.
    TransientError,
}

/// Why a job failed, with a user-facing and an internal message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReason {
    /// Attributed component.
    pub failure_origin: FailureOrigin,
    /// Failure category.
    pub failure_type: FailureType,
    /// Whether a retry may succeed.
    pub retryable: bool,
    /// Message shown to users.
    pub external_message: String,
    /// Message for operators.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_message: Option<String>,
    /// Extra structured context.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

impl FailureReason {
    /// Non-retryable platform system error stamped with the current time.
    pub fn platform(external_message: impl Into<String>) -> Self {
        Self {
            failure_origin: FailureOrigin::AirbytePlatform,
            failure_type: FailureType::SystemError,
            retryable: false,
            external_message: external_message.into(),
            internal_message: None,
            metadata: BTreeMap::new(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Set the internal message.
    pub fn with_internal_message(mut self, message: impl Into<String>) -> Self {
        self.internal_message = Some(message.into());
        self
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Output of a connector job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorJobOutput {
    /// Job kind.
    pub output_type: OutputType,
    /// Check result, for checks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_connection: Option<CheckConnectionOutput>,
    /// Stored catalog id, for discovers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discover_catalog_id: Option<Uuid>,
    /// Connector specification, for spec jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<Value>,
    /// Replication summary, for syncs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication: Option<Value>,
    /// Set when the job failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
}

impl ConnectorJobOutput {
    /// Empty output of a kind.
    pub fn new(output_type: OutputType) -> Self {
        Self {
            output_type,
            check_connection: None,
            discover_catalog_id: None,
            spec: None,
            replication: None,
            failure_reason: None,
        }
    }

    /// Attach a failure reason.
    pub fn with_failure(mut self, reason: FailureReason) -> Self {
        self.failure_reason = Some(reason);
        self
    }

    /// Output for a workload that finished without leaving a document.
    pub fn missing(output_type: OutputType, workload_id: &str) -> Self {
        let mut output = Self::new(output_type).with_failure(
            FailureReason::platform("Failed to read the output of the connector job")
                .with_internal_message(format!("No output recorded for workload {}", workload_id)),
        );
        if output_type == OutputType::CheckConnection {
            output.check_connection = Some(CheckConnectionOutput {
                status: CheckStatus::Failed,
                message: Some("Failed to read the check output".to_string()),
            });
        }
        output
    }

    /// Read an output document.
    pub async fn read_from_file(path: &Path) -> std::io::Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Write an output document, creating parent directories.
    pub async fn write_to_file(&self, path: &Path) -> std::io::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, content).await
    }
}

/// Path of a workload's output document.
pub fn output_file_path(data_dir: &Path, workload_id: &str) -> PathBuf {
    data_dir.join(workload_id).join("output.json")
}

/// Reads the output a workload left behind.
#[async_trait]
pub trait WorkloadOutputReader: Send + Sync {
    /// `None` when the workload recorded no output.
    async fn read_output(&self, workload_id: &str)
    -> Result<Option<ConnectorJobOutput>, CommandError>;
}

/// Reads `output.json` documents under a data directory.
#[derive(Debug, Clone)]
pub struct FileWorkloadOutputReader {
    data_dir: PathBuf,
}

impl FileWorkloadOutputReader {
    /// Create a reader rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }
}

#[async_trait]
impl WorkloadOutputReader for FileWorkloadOutputReader {
    async fn read_output(
        &self,
        workload_id: &str,
    ) -> Result<Option<ConnectorJobOutput>, CommandError> {
        let path = output_file_path(&self.data_dir, workload_id);
        match ConnectorJobOutput::read_from_file(&path).await {
            Ok(output) => Ok(Some(output)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CommandError::Output {
                workload_id: workload_id.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

/// Output reader backed by a map.
#[derive(Debug, Default)]
pub struct InMemoryWorkloadOutputReader {
    outputs: Mutex<HashMap<String, ConnectorJobOutput>>,
}

impl InMemoryWorkloadOutputReader {
    /// Empty reader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the output of a workload.
    pub fn insert(&self, workload_id: impl Into<String>, output: ConnectorJobOutput) {
        if let Ok(mut outputs) = self.outputs.lock() {
            outputs.insert(workload_id.into(), output);
        }
    }
}

#[async_trait]
impl WorkloadOutputReader for InMemoryWorkloadOutputReader {
    async fn read_output(
        &self,
        workload_id: &str,
    ) -> Result<Option<ConnectorJobOutput>, CommandError> {
        let outputs = self.outputs.lock().map_err(|e| CommandError::Output {
            workload_id: workload_id.to_string(),
            message: e.to_string(),
        })?;
        Ok(outputs.get(workload_id).cloned())
    }
}
