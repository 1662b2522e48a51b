// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Start-time jitter so syncs on the same schedule don't start together.
//!
//! Longer waits get larger jitter. Cron schedules only ever move later so
//! they never fire before the configured time; other schedules spread
//! around the nominal start.

use std::time::Duration;

use rand::Rng;
use tracing::debug;

use super::ScheduleType;

/// Jitter buckets, all in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitterConfig {
    /// Waits at or below this get no jitter.
    pub no_jitter_cutoff_minutes: u64,
    /// Upper bound of the high-frequency bucket.
    pub high_frequency_threshold_minutes: u64,
    /// Upper bound of the medium-frequency bucket.
    pub medium_frequency_threshold_minutes: u64,
    /// Upper bound of the low-frequency bucket.
    pub low_frequency_threshold_minutes: u64,
    /// Maximum jitter for the high-frequency bucket.
    pub high_frequency_jitter_amount_minutes: u64,
    /// Maximum jitter for the medium-frequency bucket.
    pub medium_frequency_jitter_amount_minutes: u64,
    /// Maximum jitter for the low-frequency bucket.
    pub low_frequency_jitter_amount_minutes: u64,
    /// Maximum jitter for anything longer.
    pub very_low_frequency_jitter_amount_minutes: u64,
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            no_jitter_cutoff_minutes: 5,
            high_frequency_threshold_minutes: 90,
            medium_frequency_threshold_minutes: 150,
            low_frequency_threshold_minutes: 1500,
            high_frequency_jitter_amount_minutes: 2,
            medium_frequency_jitter_amount_minutes: 5,
            low_frequency_jitter_amount_minutes: 15,
            very_low_frequency_jitter_amount_minutes: 25,
        }
    }
}

impl JitterConfig {
    /// Maximum jitter in seconds for a wait, `None` under the cutoff.
    fn max_jitter_seconds(&self, wait: Duration) -> Option<u64> {
        let minutes = |m: u64| Duration::from_secs(m.saturating_mul(60));

        if wait <= minutes(self.no_jitter_cutoff_minutes) {
            return None;
        }

        let amount = if wait <= minutes(self.high_frequency_threshold_minutes) {
            self.high_frequency_jitter_amount_minutes
        } else if wait <= minutes(self.medium_frequency_threshold_minutes) {
            self.medium_frequency_jitter_amount_minutes
        } else if wait <= minutes(self.low_frequency_threshold_minutes) {
            self.low_frequency_jitter_amount_minutes
        } else {
            self.very_low_frequency_jitter_amount_minutes
        };
        Some(amount.saturating_mul(60))
    }
}

/// Adds jitter to the wait before a scheduled sync.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScheduleJitterHelper {
    config: JitterConfig,
}

impl ScheduleJitterHelper {
    /// Create a helper.
    pub fn new(config: JitterConfig) -> Self {
        Self { config }
    }

    /// Bucket configuration.
    pub fn config(&self) -> &JitterConfig {
        &self.config
    }

    /// Jitter `wait` using the thread-local RNG.
    pub fn add_jitter_based_on_wait_time(
        &self,
        wait: Duration,
        schedule_type: ScheduleType,
    ) -> Duration {
        self.add_jitter_with_rng(wait, schedule_type, &mut rand::thread_rng())
    }

    /// Jitter `wait` with a caller-supplied RNG.
    pub fn add_jitter_with_rng<R: Rng + ?Sized>(
        &self,
        wait: Duration,
        schedule_type: ScheduleType,
        rng: &mut R,
    ) -> Duration {
        let Some(max_jitter) = self.config.max_jitter_seconds(wait) else {
            return wait;
        };

        let drawn = rng.gen_range(0..=max_jitter);
        let jitter = match schedule_type {
            ScheduleType::Cron => i128::from(drawn),
            ScheduleType::Manual | ScheduleType::BasicSchedule => {
                i128::from(drawn) - i128::from(max_jitter / 2)
            }
        };

        let jittered = (wait.as_millis() as i128 + jitter * 1000).max(0);
        let result = Duration::from_millis(u64::try_from(jittered).unwrap_or(u64::MAX));
        debug!(
            wait_secs = wait.as_secs(),
            jitter_secs = jitter as i64,
            ?schedule_type,
            "Applied schedule jitter"
        );
        result
    }
}
