// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types shared by the worker's external API seams.

use thiserror::Error;

/// Failure reported by an external API (stats, flags, organizations,
/// retry state, workspaces, API-mediated commands).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ApiError {
    /// The requested entity does not exist (HTTP 404).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other failure: transport, timeout, server error.
    #[error("{0}")]
    Other(String),
}

impl ApiError {
    /// Shorthand for [`ApiError::Other`].
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

/// Outcome of one external fetch, mapped at the call boundary so callers
/// match on absence and transience instead of inspecting errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult<T> {
    /// The value was returned.
    Found(T),
    /// The API answered that nothing exists.
    NotFound,
    /// The call failed and may succeed later.
    Retryable(ApiError),
}

impl<T> From<Result<T, ApiError>> for FetchResult<T> {
    fn from(result: Result<T, ApiError>) -> Self {
        match result {
            Ok(value) => Self::Found(value),
            Err(ApiError::NotFound(_)) => Self::NotFound,
            Err(e) => Self::Retryable(e),
        }
    }
}

/// Error surfaced by a worker activity to the orchestration layer.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ActivityError {
    /// A dependency failed transiently; the caller should retry the activity.
    #[error("Retryable failure in {operation}: {cause}")]
    Retryable {
        /// Activity step that failed.
        operation: &'static str,
        /// Underlying API failure.
        #[source]
        cause: ApiError,
    },

    /// A required entity is absent; retrying will not help.
    #[error("Not found in {operation}: {message}")]
    NotFound {
        /// Activity step that failed.
        operation: &'static str,
        /// What was missing.
        message: String,
    },
}

impl ActivityError {
    /// Wrap an API failure as retryable.
    pub fn retryable(operation: &'static str, cause: ApiError) -> Self {
        Self::Retryable { operation, cause }
    }

    /// Whether the orchestration layer should retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }
}
