// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wait until the next cron run of a connection.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use croner::Cron;

use super::ScheduleError;

/// Minimum gap between a job's creation and the next scheduled run.
const MIN_GAP_AFTER_PRIOR_JOB: TimeDelta = TimeDelta::seconds(60);

/// Parse an IANA time zone id such as `Europe/Warsaw`.
pub fn parse_timezone(timezone: &str) -> Result<Tz, ScheduleError> {
    timezone
        .parse::<Tz>()
        .map_err(|_| ScheduleError::InvalidTimezone(timezone.to_string()))
}

/// Time to wait before the next run of `cron_expression` in `timezone`.
///
/// The next run is the first occurrence strictly after the prior job's
/// creation plus one minute, or after `now` when there is no prior job.
/// Runs already due return zero. Seconds are optional, `?` is accepted in
/// the day fields, and a trailing `*` year field is ignored.
pub fn next_runtime_based_on_previous_job_and_schedule(
    now: DateTime<Utc>,
    prior_job_created_at: Option<DateTime<Utc>>,
    cron_expression: &str,
    timezone: Tz,
) -> Result<Duration, ScheduleError> {
    let invalid = |message: String| ScheduleError::InvalidCron {
        expression: cron_expression.to_string(),
        message,
    };

    let cron = Cron::new(&strip_wildcard_year(cron_expression))
        .with_seconds_optional()
        .parse()
        .map_err(|e| invalid(e.to_string()))?;

    let earliest = prior_job_created_at
        .map(|created_at| created_at + MIN_GAP_AFTER_PRIOR_JOB)
        .unwrap_or(now)
        .with_timezone(&timezone);

    let next = cron
        .find_next_occurrence(&earliest, false)
        .map_err(|e| invalid(e.to_string()))?
        .with_timezone(&Utc);

    Ok((next - now).to_std().unwrap_or(Duration::ZERO))
}

/// Drop a seventh `*` year field, which the parser does not take.
fn strip_wildcard_year(expression: &str) -> String {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.as_slice() {
        [head @ .., "*"] if fields.len() == 7 => head.join(" "),
        _ => fields.join(" "),
    }
}
