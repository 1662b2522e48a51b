// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Attempt progress check.
//!
//! An attempt made progress when it committed or rejected at least one
//! record. Retry accounting uses this to tell partial failures (some data
//! moved) from complete failures.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::error::{ActivityError, ApiError, FetchResult};

/// Minimum records committed plus rejected that count as progress.
pub const PROGRESS_THRESHOLD: i64 = 1;

/// Combined record counts for one attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptStats {
    /// Records written to the destination.
    pub records_committed: i64,
    /// Records the destination refused.
    pub records_rejected: i64,
}

/// Source of attempt statistics.
#[async_trait]
pub trait AttemptStatsApi: Send + Sync {
    /// Combined stats for one attempt of a job.
    async fn get_attempt_combined_stats(
        &self,
        job_id: i64,
        attempt_number: i32,
    ) -> Result<AttemptStats, ApiError>;
}

/// Whether the stats show any data moving.
pub fn made_progress(stats: &AttemptStats) -> bool {
    stats.records_committed + stats.records_rejected >= PROGRESS_THRESHOLD
}

/// Checks whether an attempt made progress.
pub struct ProgressChecker {
    stats: Arc<dyn AttemptStatsApi>,
}

impl ProgressChecker {
    /// Create a checker over a stats source.
    pub fn new(stats: Arc<dyn AttemptStatsApi>) -> Self {
        Self { stats }
    }

    /// `false` when no stats exist for the attempt; transient API failures
    /// surface as retryable.
    #[instrument(skip(self))]
    pub async fn check(
        &self,
        job_id: i64,
        attempt_number: i32,
    ) -> Result<bool, ActivityError> {
        let fetched: FetchResult<AttemptStats> = self
            .stats
            .get_attempt_combined_stats(job_id, attempt_number)
            .await
            .into();

        match fetched {
            FetchResult::Found(stats) => {
                let progress = made_progress(&stats);
                debug!(
                    records_committed = stats.records_committed,
                    records_rejected = stats.records_rejected,
                    progress,
                    "Attempt stats fetched"
                );
                Ok(progress)
            }
            FetchResult::NotFound => {
                debug!("No stats recorded for attempt");
                Ok(false)
            }
            FetchResult::Retryable(cause) => {
                warn!(error = %cause, "Failed to fetch attempt stats");
                Err(ActivityError::retryable("check_progress", cause))
            }
        }
    }
}
