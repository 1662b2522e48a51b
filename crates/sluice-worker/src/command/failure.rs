// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Start failures that end a command with a failed output instead of an
//! error.

use super::{CommandError, CommandErrorKind, ConnectorJobOutput, FailureReason, OutputType};

/// How to report a recoverable start failure.
#[derive(Debug, Clone, Copy)]
pub struct FailureTemplate {
    /// Value of the `errorCode` metadata entry.
    pub error_code: &'static str,
    /// Builds the user-facing message from the error and workflow type.
    pub external_message: fn(&CommandError, &str) -> String,
}

/// Start failures reported as failed outputs.
pub static RECOVERABLE_FAILURES: &[(CommandErrorKind, FailureTemplate)] = &[(
    CommandErrorKind::WorkspaceNotFound,
    FailureTemplate {
        error_code: "WORKSPACE_NOT_FOUND",
        external_message: workspace_not_found_message,
    },
)];

fn workspace_not_found_message(error: &CommandError, workflow_type: &str) -> String {
    match error {
        CommandError::WorkspaceNotFound { workspace_id } => format!(
            "Workspace {} was deleted or does not exist, the {} job cannot run",
            workspace_id, workflow_type
        ),
        other => other.to_string(),
    }
}

/// Failed output for an allowlisted start error, `None` for anything else.
pub fn recover_start_failure(
    error: &CommandError,
    workflow_type: &str,
    output_type: OutputType,
) -> Option<ConnectorJobOutput> {
    let kind = error.kind();
    let (_, template) = RECOVERABLE_FAILURES.iter().find(|(k, _)| *k == kind)?;

    let reason = FailureReason::platform((template.external_message)(error, workflow_type))
        .with_internal_message(error.to_string())
        .with_metadata("errorCode", template.error_code)
        .with_metadata("workflowType", workflow_type);
    Some(ConnectorJobOutput::new(output_type).with_failure(reason))
}
