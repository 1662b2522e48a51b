// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for sluice-core.
//!
//! Provides a unified error type that maps to workload API error responses.

use std::fmt;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur while operating on workloads.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CoreError {
    /// Workload was not found in the store.
    WorkloadNotFound {
        /// The workload ID that was not found.
        workload_id: String,
    },

    /// Workload already exists (duplicate creation).
    WorkloadAlreadyExists {
        /// The workload ID that already exists.
        workload_id: String,
    },

    /// The requested operation would move the workload along an edge the
    /// lifecycle graph does not have.
    InvalidStatusTransition {
        /// The workload ID.
        workload_id: String,
        /// The status the workload is currently in.
        from: String,
        /// The status (or operation) that was requested.
        to: String,
    },

    /// Input validation failed.
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// Database operation failed.
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Build a not-found error for a workload.
    pub fn not_found(workload_id: impl Into<String>) -> Self {
        Self::WorkloadNotFound {
            workload_id: workload_id.into(),
        }
    }

    /// Build an invalid-transition error for a workload.
    pub fn invalid_transition(
        workload_id: impl Into<String>,
        from: impl fmt::Display,
        to: impl fmt::Display,
    ) -> Self {
        Self::InvalidStatusTransition {
            workload_id: workload_id.into(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::WorkloadNotFound { .. } => "WORKLOAD_NOT_FOUND",
            Self::WorkloadAlreadyExists { .. } => "WORKLOAD_ALREADY_EXISTS",
            Self::InvalidStatusTransition { .. } => "INVALID_STATUS_TRANSITION",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
        }
    }

    /// HTTP status code the workload API answers with for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::WorkloadNotFound { .. } => 404,
            Self::WorkloadAlreadyExists { .. } => 409,
            Self::InvalidStatusTransition { .. } => 422,
            Self::ValidationError { .. } => 400,
            Self::DatabaseError { .. } => 500,
        }
    }

    /// HTTP status code the heartbeat endpoint answers with for this error.
    ///
    /// A workload that is missing or can no longer run answers 410 Gone.
    pub fn heartbeat_http_status(&self) -> u16 {
        match self {
            Self::WorkloadNotFound { .. } | Self::InvalidStatusTransition { .. } => 410,
            _ => self.http_status(),
        }
    }

    /// Whether a caller may retry the operation unchanged. Only database
    /// failures are.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DatabaseError { .. })
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkloadNotFound { workload_id } => {
                write!(f, "Workload '{}' not found", workload_id)
            }
            Self::WorkloadAlreadyExists { workload_id } => {
                write!(f, "Workload '{}' already exists", workload_id)
            }
            Self::InvalidStatusTransition {
                workload_id,
                from,
                to,
            } => {
                write!(
                    f,
                    "Workload '{}' cannot transition from '{}' to '{}'",
                    workload_id, from, to
                )
            }
            Self::ValidationError { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::DatabaseError { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::DatabaseError {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}
