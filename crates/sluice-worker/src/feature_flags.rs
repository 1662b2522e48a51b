// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integer feature flags scoped to a workspace and its organization.
//!
//! A flag evaluates to [`UNSET`] when no override applies; callers fall
//! back to their configured default in that case and when the flag
//! service is unreachable.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

use crate::error::ApiError;

/// Flag value meaning "no override".
pub const UNSET: i64 = -1;

/// Integer flags the worker reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    /// Successive complete failures before giving up.
    SuccessiveCompleteFailureLimit,
    /// Complete failures per job before giving up.
    TotalCompleteFailureLimit,
    /// Successive partial failures before giving up.
    SuccessivePartialFailureLimit,
    /// Partial failures per job before giving up.
    TotalPartialFailureLimit,
    /// First backoff interval in seconds.
    BackoffMinIntervalSeconds,
    /// Backoff ceiling in seconds.
    BackoffMaxIntervalSeconds,
    /// Backoff growth factor.
    BackoffBase,
}

impl Flag {
    /// Flag key as known by the flag service.
    pub fn key(&self) -> &'static str {
        match self {
            Self::SuccessiveCompleteFailureLimit => "retry.successive-complete-failure-limit",
            Self::TotalCompleteFailureLimit => "retry.total-complete-failure-limit",
            Self::SuccessivePartialFailureLimit => "retry.successive-partial-failure-limit",
            Self::TotalPartialFailureLimit => "retry.total-partial-failure-limit",
            Self::BackoffMinIntervalSeconds => "retry.backoff-min-interval-seconds",
            Self::BackoffMaxIntervalSeconds => "retry.backoff-max-interval-seconds",
            Self::BackoffBase => "retry.backoff-base",
        }
    }
}

impl std::fmt::Display for Flag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Evaluation context: the workspace, and its organization when known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlagContext {
    /// Workspace the evaluation is for.
    pub workspace_id: Uuid,
    /// Organization owning the workspace.
    pub organization_id: Option<Uuid>,
}

impl FeatureFlagContext {
    /// Context for a workspace with no organization.
    pub fn workspace(workspace_id: Uuid) -> Self {
        Self {
            workspace_id,
            organization_id: None,
        }
    }

    /// Add the owning organization.
    pub fn with_organization(mut self, organization_id: Uuid) -> Self {
        self.organization_id = Some(organization_id);
        self
    }
}

/// Flag evaluation service.
#[async_trait]
pub trait FeatureFlagClient: Send + Sync {
    /// Evaluate an integer flag; [`UNSET`] when no override applies.
    async fn int_variation(
        &self,
        flag: Flag,
        context: &FeatureFlagContext,
    ) -> Result<i64, ApiError>;
}

/// Evaluate `flag`, falling back to `default` when unset, negative or
/// unavailable.
pub async fn resolve_config(
    client: &dyn FeatureFlagClient,
    flag: Flag,
    context: &FeatureFlagContext,
    default: i64,
) -> i64 {
    match client.int_variation(flag, context).await {
        Ok(UNSET) => default,
        Ok(value) if value < 0 => {
            warn!(flag = %flag, value, "Ignoring negative flag value");
            default
        }
        Ok(value) => value,
        Err(e) => {
            warn!(flag = %flag, error = %e, "Flag evaluation failed, using default");
            default
        }
    }
}

/// In-memory flag values. Workspace overrides win over organization
/// overrides, which win over global values.
#[derive(Debug, Clone, Default)]
pub struct StaticFeatureFlagClient {
    global: HashMap<Flag, i64>,
    organizations: HashMap<(Uuid, Flag), i64>,
    workspaces: HashMap<(Uuid, Flag), i64>,
}

impl StaticFeatureFlagClient {
    /// Client where every flag is unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value for every context.
    pub fn with_global(mut self, flag: Flag, value: i64) -> Self {
        self.global.insert(flag, value);
        self
    }

    /// Set a value for one organization.
    pub fn with_organization(mut self, organization_id: Uuid, flag: Flag, value: i64) -> Self {
        self.organizations.insert((organization_id, flag), value);
        self
    }

    /// Set a value for one workspace.
    pub fn with_workspace(mut self, workspace_id: Uuid, flag: Flag, value: i64) -> Self {
        self.workspaces.insert((workspace_id, flag), value);
        self
    }
}

#[async_trait]
impl FeatureFlagClient for StaticFeatureFlagClient {
    async fn int_variation(
        &self,
        flag: Flag,
        context: &FeatureFlagContext,
    ) -> Result<i64, ApiError> {
        let organization = context
            .organization_id
            .and_then(|org| self.organizations.get(&(org, flag)));

        Ok(self
            .workspaces
            .get(&(context.workspace_id, flag))
            .or(organization)
            .or_else(|| self.global.get(&flag))
            .copied()
            .unwrap_or(UNSET))
    }
}
