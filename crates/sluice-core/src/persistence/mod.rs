// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for sluice-core.
//!
//! This module defines the workload store abstraction and its backend
//! implementations. Every mutating operation touches a single row; status
//! changes are conditional on the status the caller last observed.

pub mod postgres;
pub mod sqlite;
#[cfg(test)]
pub(crate) mod testing;

pub use self::postgres::PostgresPersistence;
pub use self::sqlite::SqlitePersistence;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ============================================================================
// Workload Status / Type
// ============================================================================

/// Lifecycle status of a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadStatus {
    /// Created, waiting for a dataplane to claim it.
    Pending,
    /// Claimed by a dataplane.
    Claimed,
    /// The dataplane has launched the connector process.
    Launched,
    /// The connector process is heartbeating.
    Running,
    /// Finished successfully.
    Success,
    /// Finished with a failure.
    Failure,
    /// Cancelled before finishing.
    Cancelled,
}

impl WorkloadStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [WorkloadStatus; 7] = [
        Self::Pending,
        Self::Claimed,
        Self::Launched,
        Self::Running,
        Self::Success,
        Self::Failure,
        Self::Cancelled,
    ];

    /// Statuses a workload can still leave.
    pub const ACTIVE: [WorkloadStatus; 4] =
        [Self::Pending, Self::Claimed, Self::Launched, Self::Running];

    /// Statuses a workload can never leave.
    pub const TERMINAL: [WorkloadStatus; 3] = [Self::Success, Self::Failure, Self::Cancelled];

    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Launched => "launched",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the workload has reached the end of its lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Cancelled)
    }
}

impl fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CoreError::ValidationError {
                field: "status".to_string(),
                message: format!("unknown workload status '{}'", s),
            })
    }
}

/// Kind of connector work a workload carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadType {
    /// Replication between a source and a destination.
    Sync,
    /// Connection check.
    Check,
    /// Schema discovery.
    Discover,
    /// Connector specification fetch.
    Spec,
}

impl WorkloadType {
    /// Every workload type.
    pub const ALL: [WorkloadType; 4] = [Self::Sync, Self::Check, Self::Discover, Self::Spec];

    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Check => "check",
            Self::Discover => "discover",
            Self::Spec => "spec",
        }
    }
}

impl fmt::Display for WorkloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CoreError::ValidationError {
                field: "type".to_string(),
                message: format!("unknown workload type '{}'", s),
            })
    }
}

// ============================================================================
// Record Types
// ============================================================================

/// Informational key/value label attached to a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadLabel {
    /// Label key.
    pub key: String,
    /// Label value.
    pub value: String,
}

impl WorkloadLabel {
    /// Create a label.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Workload record from the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadRecord {
    /// Caller-assigned unique identifier.
    pub id: String,
    /// Dataplane that claimed the workload (None until claimed).
    pub dataplane_id: Option<String>,
    /// Current lifecycle status.
    pub status: WorkloadStatus,
    /// Ordered informational labels.
    pub labels: Vec<WorkloadLabel>,
    /// Opaque serialized command input.
    pub input_payload: String,
    /// Where the connector writes its logs.
    pub log_path: String,
    /// Routing hint for dataplane selection.
    pub geography: String,
    /// Key shared by workloads that must not run concurrently.
    pub mutex_key: Option<String>,
    /// Kind of work.
    pub workload_type: WorkloadType,
    /// Who terminated the workload (set on failure/cancel).
    pub termination_source: Option<String>,
    /// Why the workload was terminated (set on failure/cancel).
    pub termination_reason: Option<String>,
    /// When the workload was created.
    pub created_at: DateTime<Utc>,
    /// When the workload was last modified.
    pub updated_at: DateTime<Utc>,
    /// When the last heartbeat was received.
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// When the workload expires if it makes no further progress.
    pub deadline: Option<DateTime<Utc>>,
    /// Opaque payload used to resume the caller once the workload ends.
    pub signal_input: Option<String>,
}

/// Row shape shared by both backends; status, type and labels are text.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct WorkloadRow {
    pub id: String,
    pub dataplane_id: Option<String>,
    pub status: String,
    pub labels: String,
    pub input_payload: String,
    pub log_path: String,
    pub geography: String,
    pub mutex_key: Option<String>,
    pub workload_type: String,
    pub termination_source: Option<String>,
    pub termination_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    pub signal_input: Option<String>,
}

impl TryFrom<WorkloadRow> for WorkloadRecord {
    type Error = CoreError;

    fn try_from(row: WorkloadRow) -> Result<Self, Self::Error> {
        Ok(Self {
            status: row.status.parse()?,
            workload_type: row.workload_type.parse()?,
            labels: serde_json::from_str(&row.labels)?,
            id: row.id,
            dataplane_id: row.dataplane_id,
            input_payload: row.input_payload,
            log_path: row.log_path,
            geography: row.geography,
            mutex_key: row.mutex_key,
            termination_source: row.termination_source,
            termination_reason: row.termination_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_heartbeat_at: row.last_heartbeat_at,
            deadline: row.deadline,
            signal_input: row.signal_input,
        })
    }
}

pub(crate) fn rows_to_records(rows: Vec<WorkloadRow>) -> Result<Vec<WorkloadRecord>, CoreError> {
    rows.into_iter().map(WorkloadRecord::try_from).collect()
}

/// Map an insert failure, turning a primary-key collision into a conflict.
pub(crate) fn map_insert_error(workload_id: &str, err: sqlx::Error) -> CoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            CoreError::WorkloadAlreadyExists {
                workload_id: workload_id.to_string(),
            }
        }
        _ => CoreError::from(err),
    }
}

/// Column list selected by every workload query.
pub(crate) const WORKLOAD_COLUMNS: &str = "id, dataplane_id, status, labels, input_payload, \
     log_path, geography, mutex_key, workload_type, termination_source, termination_reason, \
     created_at, updated_at, last_heartbeat_at, deadline, signal_input";

/// Fields for inserting a new workload. The store sets status to pending.
#[derive(Debug, Clone)]
pub struct NewWorkload {
    /// Caller-assigned unique identifier.
    pub id: String,
    /// Ordered informational labels.
    pub labels: Vec<WorkloadLabel>,
    /// Opaque serialized command input.
    pub input_payload: String,
    /// Log location.
    pub log_path: String,
    /// Routing hint.
    pub geography: String,
    /// Mutual-exclusion key.
    pub mutex_key: Option<String>,
    /// Kind of work.
    pub workload_type: WorkloadType,
    /// Initial deadline.
    pub deadline: Option<DateTime<Utc>>,
    /// Resume payload.
    pub signal_input: Option<String>,
    /// Creation timestamp (also used as the initial `updated_at`).
    pub created_at: DateTime<Utc>,
}

/// A conditional status change.
///
/// Applied only if the workload's status is still one of `from`. Optional
/// fields left as `None` keep their stored value, except `deadline` which is
/// always written.
#[derive(Debug, Clone)]
pub struct WorkloadTransition {
    /// Statuses the workload must currently be in.
    pub from: Vec<WorkloadStatus>,
    /// Status to move to.
    pub to: WorkloadStatus,
    /// Dataplane to record (claims only).
    pub dataplane_id: Option<String>,
    /// Termination source to record.
    pub termination_source: Option<String>,
    /// Termination reason to record.
    pub termination_reason: Option<String>,
    /// Heartbeat timestamp to record.
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// New deadline (None clears it).
    pub deadline: Option<DateTime<Utc>>,
    /// Only apply if the current deadline is strictly before this instant.
    pub expected_deadline_before: Option<DateTime<Utc>>,
    /// Modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl WorkloadTransition {
    /// Create a transition from any of `from` into `to`.
    pub fn new(from: &[WorkloadStatus], to: WorkloadStatus) -> Self {
        Self {
            from: from.to_vec(),
            to,
            dataplane_id: None,
            termination_source: None,
            termination_reason: None,
            last_heartbeat_at: None,
            deadline: None,
            expected_deadline_before: None,
            updated_at: Utc::now(),
        }
    }

    /// Record the claiming dataplane.
    pub fn with_dataplane(mut self, dataplane_id: impl Into<String>) -> Self {
        self.dataplane_id = Some(dataplane_id.into());
        self
    }

    /// Record who terminated the workload and why.
    pub fn with_termination(mut self, source: Option<String>, reason: Option<String>) -> Self {
        self.termination_source = source;
        self.termination_reason = reason;
        self
    }

    /// Record a heartbeat.
    pub fn with_heartbeat(mut self, at: DateTime<Utc>) -> Self {
        self.last_heartbeat_at = Some(at);
        self
    }

    /// Set the new deadline.
    pub fn with_deadline(mut self, deadline: Option<DateTime<Utc>>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Require the stored deadline to have passed `before`.
    ///
    /// A workload without a deadline never matches.
    pub fn with_expected_deadline_before(mut self, before: DateTime<Utc>) -> Self {
        self.expected_deadline_before = Some(before);
        self
    }
}

/// Filter for workload searches. Empty lists and `None` mean "no filter".
#[derive(Debug, Clone, Default)]
pub struct WorkloadFilter {
    /// Owning dataplanes.
    pub dataplane_ids: Vec<String>,
    /// Statuses.
    pub statuses: Vec<WorkloadStatus>,
    /// Workload types.
    pub types: Vec<WorkloadType>,
    /// Only workloads created strictly before this instant.
    pub created_before: Option<DateTime<Utc>>,
    /// Only workloads whose deadline is strictly before this instant.
    pub deadline_before: Option<DateTime<Utc>>,
    /// Only workloads sharing this mutex key.
    pub mutex_key: Option<String>,
}

/// Persisted retry counters for a connection's job.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RetryStateRecord {
    /// Job the counters belong to.
    pub job_id: i64,
    /// Connection the job belongs to.
    pub connection_id: String,
    /// Consecutive complete failures.
    pub successive_complete_failures: i32,
    /// Complete failures over the job's lifetime.
    pub total_complete_failures: i32,
    /// Consecutive partial failures.
    pub successive_partial_failures: i32,
    /// Partial failures over the job's lifetime.
    pub total_partial_failures: i32,
}

/// Persistence interface used by the workload handler and monitor.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Insert a new pending workload.
    ///
    /// Returns `WorkloadAlreadyExists` if the id is taken.
    async fn insert_workload(&self, workload: &NewWorkload) -> Result<WorkloadRecord, CoreError>;

    /// Fetch a workload by id.
    async fn get_workload(&self, workload_id: &str) -> Result<Option<WorkloadRecord>, CoreError>;

    /// Check whether a workload id is taken.
    async fn workload_exists(&self, workload_id: &str) -> Result<bool, CoreError> {
        Ok(self.get_workload(workload_id).await?.is_some())
    }

    /// Apply a conditional status transition.
    ///
    /// Returns `true` if the row was updated, `false` if the workload was
    /// missing or no longer in one of `transition.from`.
    async fn transition_workload(
        &self,
        workload_id: &str,
        transition: &WorkloadTransition,
    ) -> Result<bool, CoreError>;

    /// Set a workload's status, keeping its deadline.
    ///
    /// Conditioned on the status read just before, so a concurrent change
    /// makes this return `false` instead of being overwritten.
    async fn update_status(
        &self,
        workload_id: &str,
        status: WorkloadStatus,
    ) -> Result<bool, CoreError> {
        self.update_status_with_termination(workload_id, status, None, None)
            .await
    }

    /// Set a workload's status and termination details, keeping its deadline.
    async fn update_status_with_termination(
        &self,
        workload_id: &str,
        status: WorkloadStatus,
        termination_source: Option<String>,
        termination_reason: Option<String>,
    ) -> Result<bool, CoreError> {
        let Some(current) = self.get_workload(workload_id).await? else {
            return Ok(false);
        };
        let transition = WorkloadTransition::new(&[current.status], status)
            .with_termination(termination_source, termination_reason)
            .with_deadline(current.deadline);
        self.transition_workload(workload_id, &transition).await
    }

    /// Search workloads, newest first.
    async fn search_workloads(
        &self,
        filter: &WorkloadFilter,
    ) -> Result<Vec<WorkloadRecord>, CoreError>;

    /// Search by owning dataplanes, statuses and (optionally) type.
    async fn search(
        &self,
        dataplane_ids: &[String],
        statuses: &[WorkloadStatus],
        workload_type: Option<WorkloadType>,
    ) -> Result<Vec<WorkloadRecord>, CoreError> {
        let filter = WorkloadFilter {
            dataplane_ids: dataplane_ids.to_vec(),
            statuses: statuses.to_vec(),
            types: workload_type.into_iter().collect(),
            ..Default::default()
        };
        self.search_workloads(&filter).await
    }

    /// Search by dataplanes, statuses and types for workloads created before a cutoff.
    async fn search_by_type_status_and_creation_date(
        &self,
        dataplane_ids: &[String],
        statuses: &[WorkloadStatus],
        types: &[WorkloadType],
        created_before: DateTime<Utc>,
    ) -> Result<Vec<WorkloadRecord>, CoreError> {
        let filter = WorkloadFilter {
            dataplane_ids: dataplane_ids.to_vec(),
            statuses: statuses.to_vec(),
            types: types.to_vec(),
            created_before: Some(created_before),
            ..Default::default()
        };
        self.search_workloads(&filter).await
    }

    /// Search for workloads whose deadline passed before `deadline_before`.
    async fn search_with_expired_deadline(
        &self,
        dataplane_ids: &[String],
        statuses: &[WorkloadStatus],
        deadline_before: DateTime<Utc>,
    ) -> Result<Vec<WorkloadRecord>, CoreError> {
        let filter = WorkloadFilter {
            dataplane_ids: dataplane_ids.to_vec(),
            statuses: statuses.to_vec(),
            deadline_before: Some(deadline_before),
            ..Default::default()
        };
        self.search_workloads(&filter).await
    }

    /// Non-terminal workloads sharing a mutex key.
    async fn search_active_by_mutex_key(
        &self,
        mutex_key: &str,
    ) -> Result<Vec<WorkloadRecord>, CoreError> {
        let filter = WorkloadFilter {
            statuses: WorkloadStatus::ACTIVE.to_vec(),
            mutex_key: Some(mutex_key.to_string()),
            ..Default::default()
        };
        self.search_workloads(&filter).await
    }

    /// Fetch the most recently written retry counters for a job.
    async fn get_retry_state(&self, job_id: i64) -> Result<Option<RetryStateRecord>, CoreError>;

    /// Insert or replace retry counters keyed by `(connection_id, job_id)`.
    async fn upsert_retry_state(&self, state: &RetryStateRecord) -> Result<(), CoreError>;

    /// Verify the database is reachable.
    async fn health_check_db(&self) -> Result<bool, CoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_and_terminality() {
        for status in WorkloadStatus::ALL {
            let parsed: WorkloadStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!(WorkloadStatus::TERMINAL.iter().all(|s| s.is_terminal()));
        assert!(WorkloadStatus::ACTIVE.iter().all(|s| !s.is_terminal()));
        assert_eq!("RUNNING".parse::<WorkloadStatus>().unwrap(), WorkloadStatus::Running);
    }

    #[test]
    fn test_unknown_status_is_validation_error() {
        let err = "exploded".parse::<WorkloadStatus>().unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_row_conversion_preserves_label_order() {
        let now = Utc::now();
        let row = WorkloadRow {
            id: "w1".to_string(),
            dataplane_id: None,
            status: "pending".to_string(),
            labels: r#"[{"key":"b","value":"2"},{"key":"a","value":"1"}]"#.to_string(),
            input_payload: "{}".to_string(),
            log_path: "/logs/w1".to_string(),
            geography: "auto".to_string(),
            mutex_key: None,
            workload_type: "check".to_string(),
            termination_source: None,
            termination_reason: None,
            created_at: now,
            updated_at: now,
            last_heartbeat_at: None,
            deadline: None,
            signal_input: None,
        };

        let record = WorkloadRecord::try_from(row).unwrap();
        assert_eq!(record.workload_type, WorkloadType::Check);
        assert_eq!(
            record.labels,
            vec![WorkloadLabel::new("b", "2"), WorkloadLabel::new("a", "1")]
        );
    }
}
