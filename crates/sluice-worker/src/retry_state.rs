// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Retry accounting for sync jobs.
//!
//! A [`RetryManager`] tracks complete and partial failures for one job and
//! decides whether another attempt is allowed and how long to wait first.
//! [`RetryStateClient`] builds a manager from flag-resolved limits and the
//! persisted counters, and writes counters back after each attempt.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use sluice_core::persistence::{Persistence, RetryStateRecord};

use crate::error::{ActivityError, ApiError, FetchResult};
use crate::feature_flags::{FeatureFlagClient, FeatureFlagContext, Flag, resolve_config};

/// Exponential backoff with a floor, a growth base and a ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Wait after the first failure.
    pub min_interval: Duration,
    /// Upper bound on any wait.
    pub max_interval: Duration,
    /// Growth factor between successive failures.
    pub base: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(10),
            max_interval: Duration::from_secs(1800),
            base: 3,
        }
    }
}

impl BackoffPolicy {
    /// Create a policy.
    pub fn new(min_interval: Duration, max_interval: Duration, base: u32) -> Self {
        Self {
            min_interval,
            max_interval,
            base,
        }
    }

    /// Wait before the next attempt after `failures` successive failures.
    ///
    /// Zero for zero failures, then `min * base^(failures - 1)` capped at
    /// `max_interval`.
    pub fn backoff(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }

        let factor = self.base.saturating_pow(failures - 1);
        self.min_interval
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.max_interval)
    }
}

/// Per-job failure limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryLimits {
    /// Successive complete failures allowed.
    pub successive_complete_failures: u32,
    /// Complete failures allowed over the job.
    pub total_complete_failures: u32,
    /// Successive partial failures allowed.
    pub successive_partial_failures: u32,
    /// Partial failures allowed over the job.
    pub total_partial_failures: u32,
}

impl Default for RetryLimits {
    fn default() -> Self {
        Self {
            successive_complete_failures: 5,
            total_complete_failures: 10,
            successive_partial_failures: 1000,
            total_partial_failures: 20,
        }
    }
}

/// Failure counters for one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryCounters {
    /// Complete failures since the last partial failure or success.
    pub successive_complete_failures: u32,
    /// Complete failures over the job.
    pub total_complete_failures: u32,
    /// Partial failures since the last complete failure or success.
    pub successive_partial_failures: u32,
    /// Partial failures over the job.
    pub total_partial_failures: u32,
}

impl From<&RetryStateRecord> for RetryCounters {
    fn from(record: &RetryStateRecord) -> Self {
        let count = |n: i32| u32::try_from(n).unwrap_or(0);
        Self {
            successive_complete_failures: count(record.successive_complete_failures),
            total_complete_failures: count(record.total_complete_failures),
            successive_partial_failures: count(record.successive_partial_failures),
            total_partial_failures: count(record.total_partial_failures),
        }
    }
}

/// How an attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// No data moved.
    Complete,
    /// Some data moved before the failure.
    Partial,
}

/// Retry decisions for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryManager {
    limits: RetryLimits,
    backoff_policy: BackoffPolicy,
    counters: RetryCounters,
}

impl RetryManager {
    /// Manager with zero counters.
    pub fn new(limits: RetryLimits, backoff_policy: BackoffPolicy) -> Self {
        Self {
            limits,
            backoff_policy,
            counters: RetryCounters::default(),
        }
    }

    /// Replace the counters.
    pub fn with_counters(mut self, counters: RetryCounters) -> Self {
        self.counters = counters;
        self
    }

    /// Current counters.
    pub fn counters(&self) -> RetryCounters {
        self.counters
    }

    /// Limits in force.
    pub fn limits(&self) -> RetryLimits {
        self.limits
    }

    /// Backoff policy in force.
    pub fn backoff_policy(&self) -> BackoffPolicy {
        self.backoff_policy
    }

    /// Count a failed attempt. Each kind resets the other's streak.
    pub fn record_failure(&mut self, kind: FailureKind) {
        let c = &mut self.counters;
        match kind {
            FailureKind::Complete => {
                c.successive_complete_failures = c.successive_complete_failures.saturating_add(1);
                c.total_complete_failures = c.total_complete_failures.saturating_add(1);
                c.successive_partial_failures = 0;
            }
            FailureKind::Partial => {
                c.successive_partial_failures = c.successive_partial_failures.saturating_add(1);
                c.total_partial_failures = c.total_partial_failures.saturating_add(1);
                c.successive_complete_failures = 0;
            }
        }
    }

    /// Reset both streaks. Totals are kept.
    pub fn record_success(&mut self) {
        self.counters.successive_complete_failures = 0;
        self.counters.successive_partial_failures = 0;
    }

    /// Whether every counter is still under its limit.
    pub fn should_retry(&self) -> bool {
        let c = &self.counters;
        let l = &self.limits;
        c.successive_complete_failures < l.successive_complete_failures
            && c.total_complete_failures < l.total_complete_failures
            && c.successive_partial_failures < l.successive_partial_failures
            && c.total_partial_failures < l.total_partial_failures
    }

    /// Wait before the next attempt. Partial failures never back off.
    pub fn backoff(&self) -> Duration {
        self.backoff_policy
            .backoff(self.counters.successive_complete_failures)
    }

    /// Whether the next attempt is allowed and must wait first.
    pub fn should_retry_with_backoff(&self) -> bool {
        self.should_retry() && !self.backoff().is_zero()
    }
}

/// Resolves the organization owning a workspace.
#[async_trait]
pub trait OrganizationApi: Send + Sync {
    /// Organization id for a workspace.
    async fn get_organization_id(&self, workspace_id: Uuid) -> Result<Uuid, ApiError>;
}

/// Stores retry counters per job.
#[async_trait]
pub trait RetryStateApi: Send + Sync {
    /// Latest counters for a job.
    async fn get(&self, job_id: i64) -> Result<RetryStateRecord, ApiError>;

    /// Insert or replace counters.
    async fn create_or_update(&self, state: &RetryStateRecord) -> Result<(), ApiError>;
}

/// [`RetryStateApi`] over the workload store's `retry_states` table.
pub struct EmbeddedRetryStateApi {
    persistence: Arc<dyn Persistence>,
}

impl EmbeddedRetryStateApi {
    /// Create over a persistence backend.
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self { persistence }
    }
}

#[async_trait]
impl RetryStateApi for EmbeddedRetryStateApi {
    async fn get(&self, job_id: i64) -> Result<RetryStateRecord, ApiError> {
        self.persistence
            .get_retry_state(job_id)
            .await
            .map_err(|e| ApiError::other(e.to_string()))?
            .ok_or_else(|| ApiError::NotFound(format!("retry state for job {}", job_id)))
    }

    async fn create_or_update(&self, state: &RetryStateRecord) -> Result<(), ApiError> {
        self.persistence
            .upsert_retry_state(state)
            .await
            .map_err(|e| ApiError::other(e.to_string()))
    }
}

/// Limits and backoff used when no flag overrides them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryDefaults {
    /// Default limits.
    pub limits: RetryLimits,
    /// Default backoff.
    pub backoff: BackoffPolicy,
}

/// Loads and saves retry state for sync jobs.
pub struct RetryStateClient {
    flags: Arc<dyn FeatureFlagClient>,
    organizations: Arc<dyn OrganizationApi>,
    retry_states: Arc<dyn RetryStateApi>,
    defaults: RetryDefaults,
}

impl RetryStateClient {
    /// Create a client.
    pub fn new(
        flags: Arc<dyn FeatureFlagClient>,
        organizations: Arc<dyn OrganizationApi>,
        retry_states: Arc<dyn RetryStateApi>,
        defaults: RetryDefaults,
    ) -> Self {
        Self {
            flags,
            organizations,
            retry_states,
            defaults,
        }
    }

    /// Build a manager for a job: limits and backoff from flags, counters
    /// from the store. A missing job or missing state starts at zero.
    #[instrument(skip(self))]
    pub async fn hydrate_retry_state(
        &self,
        job_id: Option<i64>,
        workspace_id: Uuid,
    ) -> Result<RetryManager, ActivityError> {
        let mut context = FeatureFlagContext::workspace(workspace_id);
        match self.organizations.get_organization_id(workspace_id).await {
            Ok(organization_id) => context = context.with_organization(organization_id),
            Err(e) => warn!(
                error = %e,
                "Organization lookup failed, evaluating flags per workspace"
            ),
        }

        let limits = self.resolve_limits(&context).await;
        let backoff = self.resolve_backoff(&context).await;
        let manager = RetryManager::new(limits, backoff);

        let Some(job_id) = job_id else {
            return Ok(manager);
        };

        let fetched: FetchResult<RetryStateRecord> = self.retry_states.get(job_id).await.into();
        match fetched {
            FetchResult::Found(record) => {
                let counters = RetryCounters::from(&record);
                debug!(?counters, "Hydrated retry counters");
                Ok(manager.with_counters(counters))
            }
            FetchResult::NotFound => {
                debug!("No retry state recorded, starting from zero");
                Ok(manager)
            }
            FetchResult::Retryable(cause) => {
                Err(ActivityError::retryable("hydrate_retry_state", cause))
            }
        }
    }

    /// Save the manager's counters. `false` when the store rejected the
    /// write; transport failures are retryable.
    #[instrument(skip(self, manager))]
    pub async fn persist_retry_state(
        &self,
        job_id: i64,
        connection_id: Uuid,
        manager: &RetryManager,
    ) -> Result<bool, ActivityError> {
        let c = manager.counters();
        let count = |n: u32| i32::try_from(n).unwrap_or(i32::MAX);
        let record = RetryStateRecord {
            job_id,
            connection_id: connection_id.to_string(),
            successive_complete_failures: count(c.successive_complete_failures),
            total_complete_failures: count(c.total_complete_failures),
            successive_partial_failures: count(c.successive_partial_failures),
            total_partial_failures: count(c.total_partial_failures),
        };

        match self.retry_states.create_or_update(&record).await {
            Ok(()) => {
                info!(
                    successive_complete_failures = c.successive_complete_failures,
                    successive_partial_failures = c.successive_partial_failures,
                    "Retry state persisted"
                );
                Ok(true)
            }
            Err(ApiError::NotFound(message)) => {
                warn!(reason = %message, "Retry state write rejected");
                Ok(false)
            }
            Err(e) => Err(ActivityError::retryable("persist_retry_state", e)),
        }
    }

    async fn resolve_limits(&self, context: &FeatureFlagContext) -> RetryLimits {
        let d = self.defaults.limits;
        RetryLimits {
            successive_complete_failures: self
                .resolve_u32(
                    Flag::SuccessiveCompleteFailureLimit,
                    context,
                    d.successive_complete_failures,
                )
                .await,
            total_complete_failures: self
                .resolve_u32(Flag::TotalCompleteFailureLimit, context, d.total_complete_failures)
                .await,
            successive_partial_failures: self
                .resolve_u32(
                    Flag::SuccessivePartialFailureLimit,
                    context,
                    d.successive_partial_failures,
                )
                .await,
            total_partial_failures: self
                .resolve_u32(Flag::TotalPartialFailureLimit, context, d.total_partial_failures)
                .await,
        }
    }

    async fn resolve_backoff(&self, context: &FeatureFlagContext) -> BackoffPolicy {
        let d = self.defaults.backoff;
        let min_secs = self
            .resolve_u64(Flag::BackoffMinIntervalSeconds, context, d.min_interval.as_secs())
            .await;
        let max_secs = self
            .resolve_u64(Flag::BackoffMaxIntervalSeconds, context, d.max_interval.as_secs())
            .await;
        let base = self.resolve_u32(Flag::BackoffBase, context, d.base).await;
        BackoffPolicy::new(
            Duration::from_secs(min_secs),
            Duration::from_secs(max_secs),
            base,
        )
    }

    async fn resolve_u32(&self, flag: Flag, context: &FeatureFlagContext, default: u32) -> u32 {
        let value = resolve_config(self.flags.as_ref(), flag, context, i64::from(default)).await;
        u32::try_from(value).unwrap_or(default)
    }

    async fn resolve_u64(&self, flag: Flag, context: &FeatureFlagContext, default: u64) -> u64 {
        let fallback = i64::try_from(default).unwrap_or(i64::MAX);
        let value = resolve_config(self.flags.as_ref(), flag, context, fallback).await;
        u64::try_from(value).unwrap_or(default)
    }
}
