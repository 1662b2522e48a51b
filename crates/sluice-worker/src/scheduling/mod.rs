// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sync scheduling helpers: cron next-run computation and start-time jitter.

mod cron;
mod jitter;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use cron::{next_runtime_based_on_previous_job_and_schedule, parse_timezone};
pub use jitter::{JitterConfig, ScheduleJitterHelper};

/// How a connection's syncs are triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    /// Only on demand.
    Manual,
    /// Every fixed interval.
    BasicSchedule,
    /// On a cron expression.
    Cron,
}

/// Scheduling errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ScheduleError {
    /// The cron expression could not be parsed or has no next run.
    #[error("Invalid cron expression '{expression}': {message}")]
    InvalidCron {
        /// Expression as given.
        expression: String,
        /// Parser message.
        message: String,
    },

    /// The time zone id is unknown.
    #[error("Invalid time zone '{0}'")]
    InvalidTimezone(String),
}
