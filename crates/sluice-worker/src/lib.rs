// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sluice Worker - Connector Job Coordination
//!
//! Worker-side logic that runs around the workload store in `sluice-core`:
//! launching connector commands as workloads, heartbeating them, deciding
//! whether a failed sync is retried and when the next scheduled sync starts.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐     ┌──────────────────────────────┐
//! │  ConnectorCommandWorkflow    │     │  RetryStateClient            │
//! │  (start / poll / output)     │     │  (flags + stored counters)   │
//! └──────────────────────────────┘     └──────────────────────────────┘
//!          │                                    │
//!          │ WorkloadApiClient                  │ RetryStateApi
//!          ▼                                    ▼
//! ┌──────────────────────────────┐     ┌──────────────────────────────┐
//! │  HeartbeatMonitor            │────►│  sluice-core                 │
//! │  (abort flag)                │     │  WorkloadHandler/Persistence │
//! └──────────────────────────────┘     └──────────────────────────────┘
//! ```
//!
//! External services (attempt stats, feature flags, organizations,
//! workspaces, the command service) are reached through traits so each can
//! be backed by an HTTP client or an in-process implementation.
//!
//! # Configuration
//!
//! See [`config::Config::from_env`] for the environment variables.

#![deny(missing_docs)]

/// Workload API client trait and in-process implementation.
pub mod client;

/// Connector commands and the workflow that drives them.
pub mod command;

/// Worker configuration from environment variables.
pub mod config;

/// Errors shared by the external API seams.
pub mod error;

/// Integer feature flags.
pub mod feature_flags;

/// Worker-side heartbeat sender with abort detection.
pub mod heartbeat_monitor;

/// Attempt progress check.
pub mod progress_checker;

/// Retry limits, backoff and persisted counters.
pub mod retry_state;

/// Cron and jitter scheduling helpers.
pub mod scheduling;

pub use client::{ClientError, EmbeddedWorkloadClient, WorkloadApiClient};
pub use command::{ConnectorCommand, ConnectorCommandInput, ConnectorCommandWorkflow};
pub use error::{ActivityError, ApiError, FetchResult};
pub use heartbeat_monitor::{HeartbeatHandle, HeartbeatMonitor, HeartbeatMonitorConfig};
pub use progress_checker::ProgressChecker;
pub use retry_state::{BackoffPolicy, RetryManager, RetryStateClient};
pub use scheduling::{ScheduleJitterHelper, ScheduleType};
