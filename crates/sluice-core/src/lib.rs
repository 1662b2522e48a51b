// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sluice Core - Workload Store and Lifecycle Engine
//!
//! This crate owns the workload record: a unit of connector work (check,
//! discover, spec or sync) tracked from creation through claim, launch,
//! heartbeat-driven execution and a terminal outcome. It persists workloads
//! and per-job retry counters to PostgreSQL or SQLite.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          sluice-worker                                  │
//! │   (command workflow, heartbeat monitor, retry state, scheduling)        │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    │ WorkloadApiClient
//!                                    ▼
//! ┌───────────────────────┐    ┌─────────────────────────────┐
//! │   WorkloadHandler     │◄───│   WorkloadMonitor           │
//! │  (This Crate)         │    │   (deadline sweeps)         │
//! └───────────────────────┘    └─────────────────────────────┘
//!           │
//!           ▼
//! ┌───────────────────────┐
//! │ PostgreSQL / SQLite   │
//! └───────────────────────┘
//! ```
//!
//! # Workload Status State Machine
//!
//! | Status | Description |
//! |--------|-------------|
//! | `pending` | Created, waiting for a dataplane to claim it |
//! | `claimed` | Owned by a dataplane |
//! | `launched` | Connector process started by the dataplane |
//! | `running` | Connector is heartbeating |
//! | `success` | Finished successfully |
//! | `failure` | Failed (by the worker or the deadline monitor) |
//! | `cancelled` | Cancelled by a caller, a newer workload or the monitor |
//!
//! Every active status can move to `cancelled`; claimed, launched and
//! running can move to `failure`. Terminal statuses never change. A repeat
//! of the operation that produced the current status is a no-op; any other
//! operation on a terminal workload is an invalid transition.
//!
//! # Configuration
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `SLUICE_DATABASE_URL` | Yes | - | PostgreSQL connection string |
//! | `SLUICE_MONITOR_POLL_INTERVAL_SECS` | No | `30` | Deadline sweep interval |
//! | `SLUICE_WORKLOAD_NOT_CLAIMED_TIMEOUT_SECS` | No | `7200` | Claim deadline |
//! | `SLUICE_WORKLOAD_NOT_STARTED_TIMEOUT_SECS` | No | `900` | Start deadline |
//! | `SLUICE_WORKLOAD_HEARTBEAT_TIMEOUT_SECS` | No | `600` | Heartbeat deadline |

#![deny(missing_docs)]

/// Service configuration loaded from environment variables.
pub mod config;

/// Error types for workload operations with API status mapping.
pub mod error;

/// Embedded database migrations.
pub mod migrations;

/// Workload and retry state storage (PostgreSQL and SQLite).
pub mod persistence;

/// Workload lifecycle handler.
pub mod workload_handlers;

/// Background deadline monitor.
pub mod workload_monitor;

pub use error::{CoreError, Result};
pub use persistence::{
    Persistence, PostgresPersistence, SqlitePersistence, WorkloadLabel, WorkloadRecord,
    WorkloadStatus, WorkloadType,
};
pub use workload_handlers::{CreateWorkloadRequest, WorkloadDeadlineConfig, WorkloadHandler};
pub use workload_monitor::{WorkloadMonitor, WorkloadMonitorConfig};
