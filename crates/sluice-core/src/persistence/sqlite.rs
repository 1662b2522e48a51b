// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed persistence implementation.

use std::path::Path;

use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::error::CoreError;
use crate::migrations::SQLITE as MIGRATOR;

use super::{
    NewWorkload, Persistence, RetryStateRecord, WORKLOAD_COLUMNS, WorkloadFilter, WorkloadRecord,
    WorkloadRow, WorkloadTransition, map_insert_error, rows_to_records,
};

/// SQLite-backed persistence provider.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Create a new SQLite persistence provider from an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a new SQLite persistence from a file path.
    ///
    /// Creates parent directories and the database file if needed, connects
    /// and runs all migrations.
    ///
    /// ```ignore
    /// let persistence = SqlitePersistence::from_path(".data/sluice.db").await?;
    /// ```
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::DatabaseError {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        Self::connect(&url, 5).await
    }

    /// Create a private in-memory database with migrations applied.
    ///
    /// A single connection is used so every query sees the same database.
    pub async fn in_memory() -> Result<Self, CoreError> {
        Self::connect("sqlite::memory:", 1).await
    }

    async fn connect(url: &str, max_connections: u32) -> Result<Self, CoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {}: {}", url, e),
            })?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }

    /// Access the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Append `AND <column> IN (...)` for a non-empty list of text values.
fn push_text_in(qb: &mut QueryBuilder<'_, Sqlite>, column: &str, values: Vec<String>) {
    if values.is_empty() {
        return;
    }
    qb.push(" AND ").push(column).push(" IN (");
    let mut separated = qb.separated(", ");
    for value in values {
        separated.push_bind(value);
    }
    separated.push_unseparated(")");
}

#[async_trait::async_trait]
impl Persistence for SqlitePersistence {
    async fn insert_workload(&self, workload: &NewWorkload) -> Result<WorkloadRecord, CoreError> {
        let labels = serde_json::to_string(&workload.labels)?;

        sqlx::query(
            r#"
            INSERT INTO workloads (
                id, dataplane_id, status, labels, input_payload, log_path, geography,
                mutex_key, workload_type, created_at, updated_at, deadline, signal_input
            )
            VALUES (?, NULL, 'pending', ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&workload.id)
        .bind(labels)
        .bind(&workload.input_payload)
        .bind(&workload.log_path)
        .bind(&workload.geography)
        .bind(&workload.mutex_key)
        .bind(workload.workload_type.as_str())
        .bind(workload.created_at)
        .bind(workload.created_at)
        .bind(workload.deadline)
        .bind(&workload.signal_input)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(&workload.id, e))?;

        self.get_workload(&workload.id)
            .await?
            .ok_or_else(|| CoreError::not_found(&workload.id))
    }

    async fn get_workload(&self, workload_id: &str) -> Result<Option<WorkloadRecord>, CoreError> {
        let query = format!("SELECT {} FROM workloads WHERE id = ?", WORKLOAD_COLUMNS);
        let row = sqlx::query_as::<_, WorkloadRow>(&query)
            .bind(workload_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(WorkloadRecord::try_from).transpose()
    }

    async fn workload_exists(&self, workload_id: &str) -> Result<bool, CoreError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM workloads WHERE id = ?")
            .bind(workload_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.0 > 0)
    }

    async fn transition_workload(
        &self,
        workload_id: &str,
        transition: &WorkloadTransition,
    ) -> Result<bool, CoreError> {
        if transition.from.is_empty() {
            return Ok(false);
        }

        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE workloads SET status = ");
        qb.push_bind(transition.to.as_str());
        qb.push(", dataplane_id = COALESCE(")
            .push_bind(transition.dataplane_id.clone())
            .push(", dataplane_id)");
        qb.push(", termination_source = COALESCE(")
            .push_bind(transition.termination_source.clone())
            .push(", termination_source)");
        qb.push(", termination_reason = COALESCE(")
            .push_bind(transition.termination_reason.clone())
            .push(", termination_reason)");
        qb.push(", last_heartbeat_at = COALESCE(")
            .push_bind(transition.last_heartbeat_at)
            .push(", last_heartbeat_at)");
        qb.push(", deadline = ").push_bind(transition.deadline);
        qb.push(", updated_at = ").push_bind(transition.updated_at);
        qb.push(" WHERE id = ").push_bind(workload_id.to_string());
        push_text_in(
            &mut qb,
            "status",
            transition.from.iter().map(|s| s.as_str().to_string()).collect(),
        );
        if let Some(before) = transition.expected_deadline_before {
            qb.push(" AND deadline IS NOT NULL AND deadline < ")
                .push_bind(before);
        }

        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn search_workloads(
        &self,
        filter: &WorkloadFilter,
    ) -> Result<Vec<WorkloadRecord>, CoreError> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM workloads WHERE 1 = 1",
            WORKLOAD_COLUMNS
        ));
        push_text_in(&mut qb, "dataplane_id", filter.dataplane_ids.clone());
        push_text_in(
            &mut qb,
            "status",
            filter.statuses.iter().map(|s| s.as_str().to_string()).collect(),
        );
        push_text_in(
            &mut qb,
            "workload_type",
            filter.types.iter().map(|t| t.as_str().to_string()).collect(),
        );
        if let Some(created_before) = filter.created_before {
            qb.push(" AND created_at < ").push_bind(created_before);
        }
        if let Some(deadline_before) = filter.deadline_before {
            qb.push(" AND deadline IS NOT NULL AND deadline < ")
                .push_bind(deadline_before);
        }
        if let Some(mutex_key) = &filter.mutex_key {
            qb.push(" AND mutex_key = ").push_bind(mutex_key.clone());
        }
        qb.push(" ORDER BY created_at DESC");

        let rows = qb
            .build_query_as::<WorkloadRow>()
            .fetch_all(&self.pool)
            .await?;

        rows_to_records(rows)
    }

    async fn get_retry_state(&self, job_id: i64) -> Result<Option<RetryStateRecord>, CoreError> {
        let record = sqlx::query_as::<_, RetryStateRecord>(
            r#"
            SELECT job_id, connection_id, successive_complete_failures, total_complete_failures,
                   successive_partial_failures, total_partial_failures
            FROM retry_states
            WHERE job_id = ?
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn upsert_retry_state(&self, state: &RetryStateRecord) -> Result<(), CoreError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO retry_states (
                connection_id, job_id, successive_complete_failures, total_complete_failures,
                successive_partial_failures, total_partial_failures, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (connection_id, job_id) DO UPDATE
            SET successive_complete_failures = excluded.successive_complete_failures,
                total_complete_failures = excluded.total_complete_failures,
                successive_partial_failures = excluded.successive_partial_failures,
                total_partial_failures = excluded.total_partial_failures,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&state.connection_id)
        .bind(state.job_id)
        .bind(state.successive_complete_failures)
        .bind(state.total_complete_failures)
        .bind(state.successive_partial_failures)
        .bind(state.total_partial_failures)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn health_check_db(&self) -> Result<bool, CoreError> {
        let result: Result<(i64,), _> = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await;
        Ok(result.is_ok())
    }
}
