use std::fmt::Display;

use thiserror::Error;

use crate::model::ToolId;
use crate::reconcile::ActionKind;

/// Errors surfaced by the orchestration core.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Network failure, non-2xx reply or undecodable body. Recoverable by retry.
    #[error("{context}: {message}")]
    Transport { context: String, message: String },
    /// The backend reported the scan itself as failed. Not retried.
    #[error("scan of `{tool}` failed: {message}")]
    TaskFailed { tool: String, message: String },
    /// A knowledge-base mutation was rejected; the triggering control is re-enabled.
    #[error("knowledge-base {action} for `{tool}` failed: {message}")]
    Action {
        action: ActionKind,
        tool: String,
        message: String,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

impl ScanError {
    pub fn transport(context: impl Into<String>, message: impl Display) -> Self {
        Self::Transport {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Action { .. })
    }

    /// Human-facing message without the call-site context prefix.
    pub fn message(&self) -> String {
        match self {
            Self::Transport { message, .. }
            | Self::TaskFailed { message, .. }
            | Self::Action { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Input rejected before any network call was made.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("at least one tool name is required")]
    EmptyToolList,
    #[error("alternative tools must be a JSON array: {reason}")]
    AlternativeTools { reason: String },
    #[error("unknown knowledge-base field `{field}`")]
    UnknownField { field: String },
    #[error("field `{field}` expects true or false (got `{value}`)")]
    InvalidFlag { field: String, value: String },
    #[error("`{action}` for `{tool}` requires a report id")]
    MissingReportId { action: ActionKind, tool: String },
}

/// Misuse of the task tracker's lifecycle.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("a poll loop is still active for the current run; stop it before starting another")]
    PollActive,
    #[error("tool {0} appears more than once in the scan task list")]
    DuplicateTask(ToolId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_transient() {
        let err = ScanError::transport("status query", "503 Service Unavailable");
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "status query: 503 Service Unavailable");
        assert_eq!(err.message(), "503 Service Unavailable");
    }

    #[test]
    fn validation_errors_are_not_transient() {
        let err: ScanError = ValidationError::EmptyToolList.into();
        assert!(!err.is_transient());
        assert_eq!(err.message(), "at least one tool name is required");
    }
}
