// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL persistence for sluice-core.
//!
//! Storage access functions for workloads and retry state, plus the
//! [`Persistence`] implementation that delegates to them.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::CoreError;

use super::{
    NewWorkload, Persistence, RetryStateRecord, WORKLOAD_COLUMNS, WorkloadFilter, WorkloadRecord,
    WorkloadRow, WorkloadTransition, map_insert_error, rows_to_records,
};

/// PostgreSQL-backed persistence implementation.
#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Create a new Postgres-backed persistence implementation.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Access the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// `None` for an empty list so the query skips that filter.
fn text_array<T: AsRef<str>>(values: &[T]) -> Option<Vec<String>> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().map(|v| v.as_ref().to_string()).collect())
    }
}

// ============================================================================
// Workload Operations
// ============================================================================

/// Insert a new pending workload and return the stored record.
pub async fn insert_workload(
    pool: &PgPool,
    workload: &NewWorkload,
) -> Result<WorkloadRecord, CoreError> {
    let labels = serde_json::to_string(&workload.labels)?;
    let query = format!(
        r#"
        INSERT INTO workloads (
            id, dataplane_id, status, labels, input_payload, log_path, geography,
            mutex_key, workload_type, created_at, updated_at, deadline, signal_input
        )
        VALUES ($1, NULL, 'pending', $2, $3, $4, $5, $6, $7, $8, $8, $9, $10)
        RETURNING {}
        "#,
        WORKLOAD_COLUMNS
    );

    let row = sqlx::query_as::<_, WorkloadRow>(&query)
        .bind(&workload.id)
        .bind(labels)
        .bind(&workload.input_payload)
        .bind(&workload.log_path)
        .bind(&workload.geography)
        .bind(&workload.mutex_key)
        .bind(workload.workload_type.as_str())
        .bind(workload.created_at)
        .bind(workload.deadline)
        .bind(&workload.signal_input)
        .fetch_one(pool)
        .await
        .map_err(|e| map_insert_error(&workload.id, e))?;

    WorkloadRecord::try_from(row)
}

/// Get a workload by ID.
pub async fn get_workload(
    pool: &PgPool,
    workload_id: &str,
) -> Result<Option<WorkloadRecord>, CoreError> {
    let query = format!("SELECT {} FROM workloads WHERE id = $1", WORKLOAD_COLUMNS);
    let row = sqlx::query_as::<_, WorkloadRow>(&query)
        .bind(workload_id)
        .fetch_optional(pool)
        .await?;

    row.map(WorkloadRecord::try_from).transpose()
}

/// Check whether a workload ID is taken.
pub async fn workload_exists(pool: &PgPool, workload_id: &str) -> Result<bool, CoreError> {
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM workloads WHERE id = $1)")
        .bind(workload_id)
        .fetch_one(pool)
        .await?;

    Ok(exists.0)
}

/// Apply a status transition if the workload is still in one of `from`.
pub async fn transition_workload(
    pool: &PgPool,
    workload_id: &str,
    transition: &WorkloadTransition,
) -> Result<bool, CoreError> {
    if transition.from.is_empty() {
        return Ok(false);
    }
    let from: Vec<String> = transition
        .from
        .iter()
        .map(|s| s.as_str().to_string())
        .collect();

    let result = sqlx::query(
        r#"
        UPDATE workloads
        SET status = $2,
            dataplane_id = COALESCE($3, dataplane_id),
            termination_source = COALESCE($4, termination_source),
            termination_reason = COALESCE($5, termination_reason),
            last_heartbeat_at = COALESCE($6, last_heartbeat_at),
            deadline = $7,
            updated_at = $8
        WHERE id = $1
          AND status = ANY($9)
          AND ($10::TIMESTAMPTZ IS NULL OR deadline < $10)
        "#,
    )
    .bind(workload_id)
    .bind(transition.to.as_str())
    .bind(&transition.dataplane_id)
    .bind(&transition.termination_source)
    .bind(&transition.termination_reason)
    .bind(transition.last_heartbeat_at)
    .bind(transition.deadline)
    .bind(transition.updated_at)
    .bind(from)
    .bind(transition.expected_deadline_before)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Search workloads, newest first.
pub async fn search_workloads(
    pool: &PgPool,
    filter: &WorkloadFilter,
) -> Result<Vec<WorkloadRecord>, CoreError> {
    let statuses: Vec<&str> = filter.statuses.iter().map(|s| s.as_str()).collect();
    let types: Vec<&str> = filter.types.iter().map(|t| t.as_str()).collect();
    let query = format!(
        r#"
        SELECT {}
        FROM workloads
        WHERE ($1::TEXT[] IS NULL OR dataplane_id = ANY($1))
          AND ($2::TEXT[] IS NULL OR status = ANY($2))
          AND ($3::TEXT[] IS NULL OR workload_type = ANY($3))
          AND ($4::TIMESTAMPTZ IS NULL OR created_at < $4)
          AND ($5::TIMESTAMPTZ IS NULL OR (deadline IS NOT NULL AND deadline < $5))
          AND ($6::TEXT IS NULL OR mutex_key = $6)
        ORDER BY created_at DESC
        "#,
        WORKLOAD_COLUMNS
    );

    let rows = sqlx::query_as::<_, WorkloadRow>(&query)
        .bind(text_array(&filter.dataplane_ids))
        .bind(text_array(&statuses))
        .bind(text_array(&types))
        .bind(filter.created_before)
        .bind(filter.deadline_before)
        .bind(&filter.mutex_key)
        .fetch_all(pool)
        .await?;

    rows_to_records(rows)
}

// ============================================================================
// Retry State Operations
// ============================================================================

/// Get the most recently written retry state for a job.
pub async fn get_retry_state(
    pool: &PgPool,
    job_id: i64,
) -> Result<Option<RetryStateRecord>, CoreError> {
    let record = sqlx::query_as::<_, RetryStateRecord>(
        r#"
        SELECT job_id, connection_id, successive_complete_failures, total_complete_failures,
               successive_partial_failures, total_partial_failures
        FROM retry_states
        WHERE job_id = $1
        ORDER BY updated_at DESC
        LIMIT 1
        "#,
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// Insert or replace the retry counters for `(connection_id, job_id)`.
pub async fn upsert_retry_state(
    pool: &PgPool,
    state: &RetryStateRecord,
    now: DateTime<Utc>,
) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO retry_states (
            connection_id, job_id, successive_complete_failures, total_complete_failures,
            successive_partial_failures, total_partial_failures, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
        ON CONFLICT (connection_id, job_id) DO UPDATE
        SET successive_complete_failures = EXCLUDED.successive_complete_failures,
            total_complete_failures = EXCLUDED.total_complete_failures,
            successive_partial_failures = EXCLUDED.successive_partial_failures,
            total_partial_failures = EXCLUDED.total_partial_failures,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(&state.connection_id)
    .bind(state.job_id)
    .bind(state.successive_complete_failures)
    .bind(state.total_complete_failures)
    .bind(state.successive_partial_failures)
    .bind(state.total_partial_failures)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Check that the database answers.
pub async fn health_check(pool: &PgPool) -> Result<bool, CoreError> {
    let result: Result<(i32,), _> = sqlx::query_as("SELECT 1").fetch_one(pool).await;
    Ok(result.is_ok())
}

#[async_trait::async_trait]
impl Persistence for PostgresPersistence {
    async fn insert_workload(&self, workload: &NewWorkload) -> Result<WorkloadRecord, CoreError> {
        insert_workload(&self.pool, workload).await
    }

    async fn get_workload(&self, workload_id: &str) -> Result<Option<WorkloadRecord>, CoreError> {
        get_workload(&self.pool, workload_id).await
    }

    async fn workload_exists(&self, workload_id: &str) -> Result<bool, CoreError> {
        workload_exists(&self.pool, workload_id).await
    }

    async fn transition_workload(
        &self,
        workload_id: &str,
        transition: &WorkloadTransition,
    ) -> Result<bool, CoreError> {
        transition_workload(&self.pool, workload_id, transition).await
    }

    async fn search_workloads(
        &self,
        filter: &WorkloadFilter,
    ) -> Result<Vec<WorkloadRecord>, CoreError> {
        search_workloads(&self.pool, filter).await
    }

    async fn get_retry_state(&self, job_id: i64) -> Result<Option<RetryStateRecord>, CoreError> {
        get_retry_state(&self.pool, job_id).await
    }

    async fn upsert_retry_state(&self, state: &RetryStateRecord) -> Result<(), CoreError> {
        upsert_retry_state(&self.pool, state, Utc::now()).await
    }

    async fn health_check_db(&self) -> Result<bool, CoreError> {
        health_check(&self.pool).await
    }
}
