// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sluice Core - workload deadline service
//!
//! Connects to the workload store, applies migrations and runs the deadline
//! monitor until interrupted.

use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

use sluice_core::config::Config;
use sluice_core::migrations;
use sluice_core::persistence::{Persistence, PostgresPersistence};
use sluice_core::workload_handlers::WorkloadHandler;
use sluice_core::workload_monitor::{WorkloadMonitor, WorkloadMonitorConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sluice_core=info".parse()?),
        )
        .init();

    info!("Starting Sluice Core");

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        poll_interval_secs = config.monitor_poll_interval.as_secs(),
        not_claimed_timeout_secs = config.not_claimed_timeout_secs,
        not_started_timeout_secs = config.not_started_timeout_secs,
        heartbeat_timeout_secs = config.heartbeat_timeout_secs,
        "Configuration loaded"
    );

    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    info!("Running database migrations...");
    migrations::run_postgres(&pool).await?;
    info!("Migrations completed");

    let persistence: Arc<dyn Persistence> = Arc::new(PostgresPersistence::new(pool.clone()));
    if !persistence.health_check_db().await? {
        anyhow::bail!("database health check failed");
    }
    info!("Database health check passed");

    let handler = WorkloadHandler::with_deadlines(persistence, config.deadlines());
    let monitor = Arc::new(WorkloadMonitor::new(
        handler,
        WorkloadMonitorConfig {
            poll_interval: config.monitor_poll_interval,
        },
    ));
    let shutdown = monitor.shutdown_handle();

    let monitor_handle = {
        let monitor = monitor.clone();
        tokio::spawn(async move { monitor.run().await })
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    shutdown.notify_one();
    if let Err(e) = monitor_handle.await {
        error!("Deadline monitor task error: {}", e);
    }

    pool.close().await;
    info!("Shutdown complete");

    Ok(())
}
