// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite store that lets tests interleave writes with the code under test.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    NewWorkload, Persistence, RetryStateRecord, SqlitePersistence, WorkloadFilter,
    WorkloadRecord, WorkloadStatus, WorkloadTransition,
};
use crate::error::CoreError;

/// In-memory SQLite store with hooks for concurrent writers.
pub(crate) struct RacingPersistence {
    inner: SqlitePersistence,
    blind_exists_check: bool,
    after_expired_search: Vec<WorkloadTransition>,
}

impl RacingPersistence {
    pub(crate) async fn new() -> Self {
        Self {
            inner: SqlitePersistence::in_memory()
                .await
                .expect("Failed to create in-memory SQLite persistence"),
            blind_exists_check: false,
            after_expired_search: Vec::new(),
        }
    }

    /// Report every id as free, as if another writer inserted it after the check.
    pub(crate) fn with_blind_exists_check(mut self) -> Self {
        self.blind_exists_check = true;
        self
    }

    /// Apply `transition` to each workload an expired-deadline search returns,
    /// after the search has read it.
    pub(crate) fn with_transition_after_expired_search(
        mut self,
        transition: WorkloadTransition,
    ) -> Self {
        self.after_expired_search.push(transition);
        self
    }
}

#[async_trait]
impl Persistence for RacingPersistence {
    async fn insert_workload(&self, workload: &NewWorkload) -> Result<WorkloadRecord, CoreError> {
        self.inner.insert_workload(workload).await
    }

    async fn get_workload(&self, workload_id: &str) -> Result<Option<WorkloadRecord>, CoreError> {
        self.inner.get_workload(workload_id).await
    }

    async fn workload_exists(&self, workload_id: &str) -> Result<bool, CoreError> {
        if self.blind_exists_check {
            return Ok(false);
        }
        self.inner.workload_exists(workload_id).await
    }

    async fn transition_workload(
        &self,
        workload_id: &str,
        transition: &WorkloadTransition,
    ) -> Result<bool, CoreError> {
        self.inner.transition_workload(workload_id, transition).await
    }

    async fn search_workloads(
        &self,
        filter: &WorkloadFilter,
    ) -> Result<Vec<WorkloadRecord>, CoreError> {
        self.inner.search_workloads(filter).await
    }

    async fn search_with_expired_deadline(
        &self,
        dataplane_ids: &[String],
        statuses: &[WorkloadStatus],
        deadline_before: DateTime<Utc>,
    ) -> Result<Vec<WorkloadRecord>, CoreError> {
        let found = self
            .inner
            .search_with_expired_deadline(dataplane_ids, statuses, deadline_before)
            .await?;
        for workload in &found {
            for transition in &self.after_expired_search {
                self.inner
                    .transition_workload(&workload.id, transition)
                    .await?;
            }
        }
        Ok(found)
    }

    async fn get_retry_state(&self, job_id: i64) -> Result<Option<RetryStateRecord>, CoreError> {
        self.inner.get_retry_state(job_id).await
    }

    async fn upsert_retry_state(&self, state: &RetryStateRecord) -> Result<(), CoreError> {
        self.inner.upsert_retry_state(state).await
    }

    async fn health_check_db(&self) -> Result<bool, CoreError> {
        self.inner.health_check_db().await
    }
}
