// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for sluice-core integration tests.
//!
//! Provides a SQLite-backed context that always runs and a PostgreSQL-backed
//! context that needs `TEST_DATABASE_URL`.

#![allow(dead_code)]

use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;

use sluice_core::persistence::{Persistence, PostgresPersistence, SqlitePersistence};
use sluice_core::workload_handlers::{CreateWorkloadRequest, WorkloadHandler};
use sluice_core::{WorkloadLabel, WorkloadType};

/// Handler over a fresh in-memory SQLite store.
pub async fn sqlite_handler() -> WorkloadHandler {
    let persistence = SqlitePersistence::in_memory()
        .await
        .expect("Failed to create in-memory SQLite persistence");
    WorkloadHandler::new(Arc::new(persistence))
}

/// PostgreSQL test context.
pub struct PgContext {
    pub pool: PgPool,
    pub persistence: Arc<dyn Persistence>,
    pub handler: WorkloadHandler,
}

impl PgContext {
    /// Connect to `TEST_DATABASE_URL` and run migrations.
    pub async fn new() -> Option<Self> {
        let database_url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = PgPool::connect(&database_url).await.ok()?;
        sluice_core::migrations::run_postgres(&pool).await.ok()?;

        let persistence: Arc<dyn Persistence> = Arc::new(PostgresPersistence::new(pool.clone()));
        let handler = WorkloadHandler::new(persistence.clone());
        Some(Self {
            pool,
            persistence,
            handler,
        })
    }

    /// Remove rows written by a test.
    pub async fn cleanup(&self, workload_ids: &[String]) {
        sqlx::query("DELETE FROM workloads WHERE id = ANY($1)")
            .bind(workload_ids)
            .execute(&self.pool)
            .await
            .ok();
    }
}

/// Unique workload id so concurrent runs against a shared database don't collide.
pub fn unique_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

/// Sync workload request carrying the usual labels.
pub fn sync_request(id: &str, connection_id: &str) -> CreateWorkloadRequest {
    let mut request = CreateWorkloadRequest::new(
        id,
        WorkloadType::Sync,
        format!(r#"{{"connectionId":"{}"}}"#, connection_id),
    );
    request.labels = vec![
        WorkloadLabel::new("connection_id", connection_id),
        WorkloadLabel::new("job_id", "1"),
        WorkloadLabel::new("attempt_number", "0"),
    ];
    request.log_path = format!("/workspace/{}/logs.log", id);
    request
}

/// Helper macro to skip tests if TEST_DATABASE_URL is not set.
#[macro_export]
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        }
    };
}
