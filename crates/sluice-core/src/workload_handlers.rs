// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workload lifecycle handler for sluice-core.
//!
//! Drives a workload through its status graph:
//!
//! ```text
//! PENDING -> CLAIMED -> LAUNCHED -> RUNNING -> SUCCESS
//!    |          |          |          |
//!    +----------+----------+----------+-----> CANCELLED
//!               |          |          |
//!               +----------+----------+-----> FAILURE
//! ```
//!
//! Every mutation is a conditional store update keyed on the status the
//! handler just read. When that update loses a race the workload is re-read
//! and the operation re-evaluated once against the fresh status.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument, warn};

use crate::error::CoreError;
use crate::persistence::{
    NewWorkload, Persistence, WorkloadLabel, WorkloadRecord, WorkloadStatus, WorkloadTransition,
    WorkloadType,
};

/// Termination source recorded when a newer workload supersedes an older one.
pub const WORKLOAD_API_SOURCE: &str = "workload-api";

/// Statuses considered "running" for the created-before query.
pub const RUNNING_STATUSES: [WorkloadStatus; 3] = [
    WorkloadStatus::Claimed,
    WorkloadStatus::Launched,
    WorkloadStatus::Running,
];

/// How many times a conditional update is attempted before giving up.
const MAX_TRANSITION_ATTEMPTS: usize = 2;

/// Deadlines applied when a caller does not supply one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadDeadlineConfig {
    /// Time a new workload may wait for a claim.
    pub not_claimed_timeout: Duration,
    /// Time a claimed workload may take to launch and start heartbeating.
    pub not_started_timeout: Duration,
    /// Time a running workload may go without a heartbeat.
    pub heartbeat_timeout: Duration,
}

impl Default for WorkloadDeadlineConfig {
    fn default() -> Self {
        Self {
            not_claimed_timeout: Duration::hours(2),
            not_started_timeout: Duration::minutes(15),
            heartbeat_timeout: Duration::minutes(10),
        }
    }
}

/// Request to create a workload.
#[derive(Debug, Clone)]
pub struct CreateWorkloadRequest {
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
    /// Workloads sharing a key never run concurrently.
    pub mutex_key: Option<String>,
    /// Kind of work.
    pub workload_type: WorkloadType,
    /// Explicit claim deadline.
    pub deadline: Option<DateTime<Utc>>,
    /// Resume payload.
    pub signal_input: Option<String>,
}

impl CreateWorkloadRequest {
    /// Request with the required fields; everything optional left unset.
    pub fn new(
        id: impl Into<String>,
        workload_type: WorkloadType,
        input_payload: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            log_path: format!("{}/logs.log", id),
            id,
            labels: Vec::new(),
            input_payload: input_payload.into(),
            geography: "auto".to_string(),
            mutex_key: None,
            workload_type,
            deadline: None,
            signal_input: None,
        }
    }
}

/// Outcome of evaluating an operation against the current record.
enum Step {
    /// Nothing to write; answer with this value.
    Done(bool),
    /// Apply this conditional transition.
    Apply(WorkloadTransition),
}

/// Lifecycle handler over a workload store.
#[derive(Clone)]
pub struct WorkloadHandler {
    persistence: Arc<dyn Persistence>,
    deadlines: WorkloadDeadlineConfig,
}

impl WorkloadHandler {
    /// Create a handler with default deadlines.
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self::with_deadlines(persistence, WorkloadDeadlineConfig::default())
    }

    /// Create a handler with explicit deadlines.
    pub fn with_deadlines(
        persistence: Arc<dyn Persistence>,
        deadlines: WorkloadDeadlineConfig,
    ) -> Self {
        Self {
            persistence,
            deadlines,
        }
    }

    /// The store this handler writes to.
    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.persistence
    }

    /// Deadlines applied by this handler.
    pub fn deadlines(&self) -> WorkloadDeadlineConfig {
        self.deadlines
    }

    // ========================================================================
    // Creation and lookup
    // ========================================================================

    /// Create a pending workload.
    ///
    /// Fails with `WorkloadAlreadyExists` if the id is taken. When a mutex key
    /// is given, other active workloads holding the same key are cancelled
    /// once the new one is stored.
    #[instrument(
        skip(self, request),
        fields(workload_id = %request.id, workload_type = %request.workload_type)
    )]
    pub async fn create_workload(
        &self,
        request: CreateWorkloadRequest,
    ) -> Result<WorkloadRecord, CoreError> {
        if request.id.trim().is_empty() {
            return Err(CoreError::ValidationError {
                field: "id".to_string(),
                message: "workload id must not be empty".to_string(),
            });
        }

        if self.persistence.workload_exists(&request.id).await? {
            return Err(CoreError::WorkloadAlreadyExists {
                workload_id: request.id,
            });
        }

        let now = Utc::now();
        let workload = NewWorkload {
            deadline: Some(
                request
                    .deadline
                    .unwrap_or(now + self.deadlines.not_claimed_timeout),
            ),
            id: request.id,
            labels: request.labels,
            input_payload: request.input_payload,
            log_path: request.log_path,
            geography: request.geography,
            mutex_key: request.mutex_key,
            workload_type: request.workload_type,
            signal_input: request.signal_input,
            created_at: now,
        };

        let record = self.persistence.insert_workload(&workload).await?;
        if let Some(mutex_key) = &record.mutex_key {
            self.cancel_superseded(mutex_key, &record.id).await?;
        }
        info!(
            geography = %record.geography,
            mutex_key = ?record.mutex_key,
            "Workload created"
        );
        Ok(record)
    }

    async fn cancel_superseded(&self, mutex_key: &str, new_id: &str) -> Result<(), CoreError> {
        let active = self
            .persistence
            .search_active_by_mutex_key(mutex_key)
            .await?;

        for previous in active.iter().filter(|w| w.id != new_id) {
            let reason = format!("superseded by workload {}", new_id);
            match self
                .cancel_workload(&previous.id, WORKLOAD_API_SOURCE, &reason)
                .await
            {
                Ok(()) => {
                    info!(
                        superseded = %previous.id,
                        mutex_key = %mutex_key,
                        "Cancelled superseded workload"
                    );
                }
                // Finished between the search and the cancel.
                Err(CoreError::InvalidStatusTransition { .. }) => {
                    debug!(superseded = %previous.id, "Superseded workload already finished");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Get a workload, failing with `WorkloadNotFound` if absent.
    pub async fn get_workload(&self, workload_id: &str) -> Result<WorkloadRecord, CoreError> {
        self.persistence
            .get_workload(workload_id)
            .await?
            .ok_or_else(|| CoreError::not_found(workload_id))
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Claim a workload for a dataplane.
    ///
    /// Returns `true` if the workload is (now or already) claimed by
    /// `dataplane_id`, `false` if another dataplane holds it.
    #[instrument(skip(self))]
    pub async fn claim_workload(
        &self,
        workload_id: &str,
        dataplane_id: &str,
    ) -> Result<bool, CoreError> {
        let deadline = Utc::now() + self.deadlines.not_started_timeout;
        let claimed = self
            .apply(workload_id, "claimed", |current| {
                if current.status.is_terminal() {
                    return Err(CoreError::invalid_transition(
                        workload_id,
                        current.status,
                        WorkloadStatus::Claimed,
                    ));
                }
                if current.status == WorkloadStatus::Pending {
                    return Ok(Step::Apply(
                        WorkloadTransition::new(
                            &[WorkloadStatus::Pending],
                            WorkloadStatus::Claimed,
                        )
                        .with_dataplane(dataplane_id)
                        .with_deadline(Some(deadline)),
                    ));
                }
                if current.dataplane_id.as_deref() != Some(dataplane_id) {
                    return Ok(Step::Done(false));
                }
                match current.status {
                    WorkloadStatus::Claimed | WorkloadStatus::Launched => Ok(Step::Done(true)),
                    status => Err(CoreError::invalid_transition(
                        workload_id,
                        status,
                        WorkloadStatus::Claimed,
                    )),
                }
            })
            .await?;

        if claimed {
            info!("Workload claimed");
        } else {
            debug!("Workload held by another dataplane");
        }
        Ok(claimed)
    }

    /// Record a heartbeat, moving the workload to running.
    ///
    /// Valid from claimed, launched and running. The deadline is extended to
    /// `deadline` or `now + heartbeat_timeout`.
    #[instrument(skip(self))]
    pub async fn heartbeat(
        &self,
        workload_id: &str,
        deadline: Option<DateTime<Utc>>,
    ) -> Result<(), CoreError> {
        let now = Utc::now();
        let deadline = deadline.unwrap_or(now + self.deadlines.heartbeat_timeout);
        self.apply(workload_id, "heartbeat", |current| match current.status {
            WorkloadStatus::Claimed | WorkloadStatus::Launched | WorkloadStatus::Running => {
                Ok(Step::Apply(
                    WorkloadTransition::new(&[current.status], WorkloadStatus::Running)
                        .with_heartbeat(now)
                        .with_deadline(Some(deadline)),
                ))
            }
            status => Err(CoreError::invalid_transition(
                workload_id,
                status,
                WorkloadStatus::Running,
            )),
        })
        .await?;

        debug!("Heartbeat recorded");
        Ok(())
    }

    /// Cancel a workload. No-op if already cancelled.
    #[instrument(skip(self))]
    pub async fn cancel_workload(
        &self,
        workload_id: &str,
        source: &str,
        reason: &str,
    ) -> Result<(), CoreError> {
        let applied = self
            .apply(workload_id, "cancelled", |current| match current.status {
                WorkloadStatus::Cancelled => Ok(Step::Done(false)),
                WorkloadStatus::Success | WorkloadStatus::Failure => {
                    Err(CoreError::invalid_transition(
                        workload_id,
                        current.status,
                        WorkloadStatus::Cancelled,
                    ))
                }
                status => Ok(Step::Apply(
                    WorkloadTransition::new(&[status], WorkloadStatus::Cancelled)
                        .with_termination(Some(source.to_string()), Some(reason.to_string())),
                )),
            })
            .await?;

        if applied {
            info!(source = %source, reason = %reason, "Workload cancelled");
        }
        Ok(())
    }

    /// Fail a workload. No-op if already failed.
    #[instrument(skip(self))]
    pub async fn fail_workload(
        &self,
        workload_id: &str,
        source: &str,
        reason: &str,
    ) -> Result<(), CoreError> {
        let applied = self
            .apply(workload_id, "failure", |current| match current.status {
                WorkloadStatus::Failure => Ok(Step::Done(false)),
                WorkloadStatus::Claimed | WorkloadStatus::Launched | WorkloadStatus::Running => {
                    Ok(Step::Apply(
                        WorkloadTransition::new(&[current.status], WorkloadStatus::Failure)
                            .with_termination(Some(source.to_string()), Some(reason.to_string())),
                    ))
                }
                status => Err(CoreError::invalid_transition(
                    workload_id,
                    status,
                    WorkloadStatus::Failure,
                )),
            })
            .await?;

        if applied {
            warn!(source = %source, reason = %reason, "Workload failed");
        }
        Ok(())
    }

    /// Mark a workload successful. No-op if already successful.
    #[instrument(skip(self))]
    pub async fn succeed_workload(&self, workload_id: &str) -> Result<(), CoreError> {
        let applied = self
            .apply(workload_id, "success", |current| match current.status {
                WorkloadStatus::Success => Ok(Step::Done(false)),
                WorkloadStatus::Claimed | WorkloadStatus::Launched | WorkloadStatus::Running => {
                    Ok(Step::Apply(WorkloadTransition::new(
                        &[current.status],
                        WorkloadStatus::Success,
                    )))
                }
                status => Err(CoreError::invalid_transition(
                    workload_id,
                    status,
                    WorkloadStatus::Success,
                )),
            })
            .await?;

        if applied {
            info!("Workload succeeded");
        }
        Ok(())
    }

    /// Move a claimed or launched workload to running. No-op if running.
    #[instrument(skip(self))]
    pub async fn set_workload_status_to_running(
        &self,
        workload_id: &str,
        deadline: Option<DateTime<Utc>>,
    ) -> Result<(), CoreError> {
        let deadline = deadline.unwrap_or(Utc::now() + self.deadlines.heartbeat_timeout);
        let applied = self
            .apply(workload_id, "running", |current| match current.status {
                WorkloadStatus::Running => Ok(Step::Done(false)),
                WorkloadStatus::Claimed | WorkloadStatus::Launched => Ok(Step::Apply(
                    WorkloadTransition::new(&[current.status], WorkloadStatus::Running)
                        .with_deadline(Some(deadline)),
                )),
                status => Err(CoreError::invalid_transition(
                    workload_id,
                    status,
                    WorkloadStatus::Running,
                )),
            })
            .await?;

        if applied {
            info!("Workload running");
        }
        Ok(())
    }

    /// Move a claimed workload to launched. No-op if launched.
    #[instrument(skip(self))]
    pub async fn set_workload_status_to_launched(
        &self,
        workload_id: &str,
        deadline: Option<DateTime<Utc>>,
    ) -> Result<(), CoreError> {
        let deadline = deadline.unwrap_or(Utc::now() + self.deadlines.not_started_timeout);
        let applied = self
            .apply(workload_id, "launched", |current| match current.status {
                WorkloadStatus::Launched => Ok(Step::Done(false)),
                WorkloadStatus::Claimed => Ok(Step::Apply(
                    WorkloadTransition::new(&[WorkloadStatus::Claimed], WorkloadStatus::Launched)
                        .with_deadline(Some(deadline)),
                )),
                status => Err(CoreError::invalid_transition(
                    workload_id,
                    status,
                    WorkloadStatus::Launched,
                )),
            })
            .await?;

        if applied {
            info!("Workload launched");
        }
        Ok(())
    }

    /// End a workload whose deadline passed before `now`.
    ///
    /// Pending workloads are cancelled, started ones failed. The write is
    /// conditioned on both the status and the deadline that were read, so a
    /// claim or heartbeat landing in between wins. Returns the status written,
    /// or `None` when the workload is no longer expired.
    #[instrument(skip(self))]
    pub async fn expire_workload(
        &self,
        workload_id: &str,
        source: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<WorkloadStatus>, CoreError> {
        let current = self.get_workload(workload_id).await?;
        if !current.deadline.is_some_and(|deadline| deadline < now) {
            return Ok(None);
        }

        let (to, reason) = match current.status {
            WorkloadStatus::Pending => (WorkloadStatus::Cancelled, "not claimed before deadline"),
            WorkloadStatus::Claimed | WorkloadStatus::Launched => {
                (WorkloadStatus::Failure, "not started before deadline")
            }
            WorkloadStatus::Running => (WorkloadStatus::Failure, "no heartbeat before deadline"),
            _ => return Ok(None),
        };

        let transition = WorkloadTransition::new(&[current.status], to)
            .with_termination(Some(source.to_string()), Some(reason.to_string()))
            .with_expected_deadline_before(now);
        if !self
            .persistence
            .transition_workload(workload_id, &transition)
            .await?
        {
            debug!(from = %current.status, "Workload changed before it could be expired");
            return Ok(None);
        }

        warn!(from = %current.status, to = %to, reason, "Workload expired");
        Ok(Some(to))
    }

    /// Read, evaluate and conditionally write, re-reading once on a lost race.
    ///
    /// Returns `true` when a transition was applied, otherwise the value the
    /// evaluation settled on.
    async fn apply<F>(
        &self,
        workload_id: &str,
        target: &str,
        evaluate: F,
    ) -> Result<bool, CoreError>
    where
        F: Fn(&WorkloadRecord) -> Result<Step, CoreError>,
    {
        let mut last_status = None;
        for attempt in 1..=MAX_TRANSITION_ATTEMPTS {
            let current = self.get_workload(workload_id).await?;
            let transition = match evaluate(&current)? {
                Step::Done(answer) => return Ok(answer),
                Step::Apply(transition) => transition,
            };

            if self
                .persistence
                .transition_workload(workload_id, &transition)
                .await?
            {
                debug!(from = %current.status, to = %transition.to, "Transition applied");
                return Ok(true);
            }

            debug!(
                attempt,
                from = %current.status,
                to = %transition.to,
                "Transition lost a race, re-reading"
            );
            last_status = Some(current.status);
        }

        let from = last_status.map(|s| s.to_string()).unwrap_or_default();
        Err(CoreError::invalid_transition(workload_id, from, target))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Search workloads. Empty filters match everything.
    pub async fn get_workloads(
        &self,
        dataplane_ids: &[String],
        statuses: &[WorkloadStatus],
        workload_type: Option<WorkloadType>,
    ) -> Result<Vec<WorkloadRecord>, CoreError> {
        self.persistence
            .search(dataplane_ids, statuses, workload_type)
            .await
    }

    /// Claimed, launched or running workloads created before a cutoff.
    pub async fn get_workloads_running_created_before(
        &self,
        dataplane_ids: &[String],
        types: &[WorkloadType],
        created_before: DateTime<Utc>,
    ) -> Result<Vec<WorkloadRecord>, CoreError> {
        self.persistence
            .search_by_type_status_and_creation_date(
                dataplane_ids,
                &RUNNING_STATUSES,
                types,
                created_before,
            )
            .await
    }

    /// Workloads in `statuses` whose deadline passed before `before`.
    pub async fn get_workloads_with_expired_deadline(
        &self,
        dataplane_ids: &[String],
        statuses: &[WorkloadStatus],
        before: DateTime<Utc>,
    ) -> Result<Vec<WorkloadRecord>, CoreError> {
        self.persistence
            .search_with_expired_deadline(dataplane_ids, statuses, before)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::SqlitePersistence;
    use crate::persistence::testing::RacingPersistence;

    async fn handler() -> WorkloadHandler {
        let persistence = SqlitePersistence::in_memory()
            .await
            .expect("Failed to create in-memory SQLite persistence");
        WorkloadHandler::new(Arc::new(persistence))
    }

    async fn create(handler: &WorkloadHandler, id: &str) -> WorkloadRecord {
        handler
            .create_workload(CreateWorkloadRequest::new(id, WorkloadType::Sync, "{}"))
            .await
            .expect("Failed to create workload")
    }

    #[tokio::test]
    async fn test_create_sets_pending_with_claim_deadline() {
        let handler = handler().await;
        let before = Utc::now();
        let record = create(&handler, "w1").await;

        assert_eq!(record.status, WorkloadStatus::Pending);
        assert_eq!(record.dataplane_id, None);
        assert_eq!(record.last_heartbeat_at, None);
        let deadline = record.deadline.expect("deadline should be set");
        assert!(deadline >= before + handler.deadlines().not_claimed_timeout);
    }

    #[tokio::test]
    async fn test_create_duplicate_is_conflict() {
        let handler = handler().await;
        create(&handler, "w1").await;

        let err = handler
            .create_workload(CreateWorkloadRequest::new("w1", WorkloadType::Sync, "{}"))
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 409);
    }

    #[tokio::test]
    async fn test_create_rejects_empty_id() {
        let handler = handler().await;
        let err = handler
            .create_workload(CreateWorkloadRequest::new(" ", WorkloadType::Check, "{}"))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_get_missing_workload_is_not_found() {
        let handler = handler().await;
        let err = handler.get_workload("nope").await.unwrap_err();
        assert_eq!(err, CoreError::not_found("nope"));
    }

    #[tokio::test]
    async fn test_claim_by_other_plane_returns_false() {
        let handler = handler().await;
        create(&handler, "w1").await;

        assert!(handler.claim_workload("w1", "plane-a").await.unwrap());
        assert!(!handler.claim_workload("w1", "plane-b").await.unwrap());

        let record = handler.get_workload("w1").await.unwrap();
        assert_eq!(record.dataplane_id.as_deref(), Some("plane-a"));
    }

    #[tokio::test]
    async fn test_reclaim_by_same_plane_is_idempotent() {
        let handler = handler().await;
        create(&handler, "w1").await;

        assert!(handler.claim_workload("w1", "plane-a").await.unwrap());
        let first = handler.get_workload("w1").await.unwrap();
        assert!(handler.claim_workload("w1", "plane-a").await.unwrap());
        let second = handler.get_workload("w1").await.unwrap();

        assert_eq!(first.updated_at, second.updated_at);
        assert_eq!(second.status, WorkloadStatus::Claimed);
    }

    #[tokio::test]
    async fn test_claim_running_by_same_plane_is_invalid() {
        let handler = handler().await;
        create(&handler, "w1").await;
        handler.claim_workload("w1", "plane-a").await.unwrap();
        handler.heartbeat("w1", None).await.unwrap();

        let err = handler.claim_workload("w1", "plane-a").await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_STATUS_TRANSITION");
        assert!(!handler.claim_workload("w1", "plane-b").await.unwrap());
    }

    #[tokio::test]
    async fn test_claim_missing_is_not_found() {
        let handler = handler().await;
        let err = handler.claim_workload("nope", "plane-a").await.unwrap_err();
        assert_eq!(err.http_status(), 404);
    }

    #[tokio::test]
    async fn test_heartbeat_from_pending_is_invalid() {
        let handler = handler().await;
        create(&handler, "w1").await;

        let err = handler.heartbeat("w1", None).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_STATUS_TRANSITION");
        assert_eq!(
            handler.get_workload("w1").await.unwrap().status,
            WorkloadStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_heartbeat_extends_deadline() {
        let handler = handler().await;
        create(&handler, "w1").await;
        handler.claim_workload("w1", "plane-a").await.unwrap();

        let explicit = Utc::now() + Duration::hours(3);
        handler.heartbeat("w1", Some(explicit)).await.unwrap();

        let record = handler.get_workload("w1").await.unwrap();
        assert_eq!(record.status, WorkloadStatus::Running);
        assert_eq!(record.deadline, Some(explicit));
        assert!(record.last_heartbeat_at.is_some());
    }

    #[tokio::test]
    async fn test_cancel_rules() {
        let handler = handler().await;
        create(&handler, "w1").await;

        handler.cancel_workload("w1", "user", "stop").await.unwrap();
        let record = handler.get_workload("w1").await.unwrap();
        assert_eq!(record.status, WorkloadStatus::Cancelled);
        assert_eq!(record.termination_reason.as_deref(), Some("stop"));
        assert_eq!(record.deadline, None);

        // Second cancel keeps the first reason.
        handler.cancel_workload("w1", "user", "again").await.unwrap();
        let record = handler.get_workload("w1").await.unwrap();
        assert_eq!(record.termination_reason.as_deref(), Some("stop"));

        create(&handler, "w2").await;
        handler.claim_workload("w2", "plane-a").await.unwrap();
        handler.succeed_workload("w2").await.unwrap();
        let err = handler
            .cancel_workload("w2", "user", "late")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_STATUS_TRANSITION");
    }

    #[tokio::test]
    async fn test_fail_from_pending_is_invalid() {
        let handler = handler().await;
        create(&handler, "w1").await;

        let err = handler.fail_workload("w1", "test", "x").await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_STATUS_TRANSITION");
    }

    #[tokio::test]
    async fn test_succeed_rules() {
        let handler = handler().await;
        create(&handler, "w1").await;
        assert!(handler.succeed_workload("w1").await.is_err());

        handler.claim_workload("w1", "plane-a").await.unwrap();
        handler.succeed_workload("w1").await.unwrap();
        handler.succeed_workload("w1").await.unwrap();
        assert!(handler.fail_workload("w1", "test", "x").await.is_err());
    }

    #[tokio::test]
    async fn test_launched_and_running_transitions() {
        let handler = handler().await;
        create(&handler, "w1").await;

        assert!(handler.set_workload_status_to_launched("w1", None).await.is_err());
        assert!(handler.set_workload_status_to_running("w1", None).await.is_err());

        handler.claim_workload("w1", "plane-a").await.unwrap();
        handler
            .set_workload_status_to_launched("w1", None)
            .await
            .unwrap();
        handler
            .set_workload_status_to_launched("w1", None)
            .await
            .unwrap();
        handler
            .set_workload_status_to_running("w1", None)
            .await
            .unwrap();
        handler
            .set_workload_status_to_running("w1", None)
            .await
            .unwrap();
        assert!(handler.set_workload_status_to_launched("w1", None).await.is_err());

        assert_eq!(
            handler.get_workload("w1").await.unwrap().status,
            WorkloadStatus::Running
        );
    }

    #[tokio::test]
    async fn test_mutex_key_supersedes_active_workload() {
        let handler = handler().await;
        let mut first = CreateWorkloadRequest::new("w1", WorkloadType::Sync, "{}");
        first.mutex_key = Some("connection-1".to_string());
        handler.create_workload(first).await.unwrap();
        handler.claim_workload("w1", "plane-a").await.unwrap();

        let mut second = CreateWorkloadRequest::new("w2", WorkloadType::Sync, "{}");
        second.mutex_key = Some("connection-1".to_string());
        handler.create_workload(second).await.unwrap();

        let old = handler.get_workload("w1").await.unwrap();
        assert_eq!(old.status, WorkloadStatus::Cancelled);
        assert_eq!(old.termination_source.as_deref(), Some(WORKLOAD_API_SOURCE));
        assert_eq!(
            old.termination_reason.as_deref(),
            Some("superseded by workload w2")
        );
        assert_eq!(
            handler.get_workload("w2").await.unwrap().status,
            WorkloadStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_duplicate_create_leaves_same_key_workloads_active() {
        let persistence = RacingPersistence::new().await.with_blind_exists_check();
        let handler = WorkloadHandler::new(Arc::new(persistence));

        let mut first = CreateWorkloadRequest::new("w1", WorkloadType::Sync, "{}");
        first.mutex_key = Some("connection-1".to_string());
        handler.create_workload(first.clone()).await.unwrap();
        handler.claim_workload("w1", "plane-a").await.unwrap();

        let err = handler.create_workload(first).await.unwrap_err();
        assert!(matches!(err, CoreError::WorkloadAlreadyExists { .. }));

        let workload = handler.get_workload("w1").await.unwrap();
        assert_eq!(workload.status, WorkloadStatus::Claimed);
        assert_eq!(workload.termination_source, None);
    }

    #[tokio::test]
    async fn test_running_created_before_query() {
        let handler = handler().await;
        create(&handler, "pending").await;
        create(&handler, "claimed").await;
        handler.claim_workload("claimed", "plane-a").await.unwrap();

        let found = handler
            .get_workloads_running_created_before(
                &["plane-a".to_string()],
                &[WorkloadType::Sync],
                Utc::now() + Duration::seconds(5),
            )
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "claimed");

        let all = handler.get_workloads(&[], &[], None).await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
