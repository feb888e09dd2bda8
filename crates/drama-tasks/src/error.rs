//! Error types for task bookkeeping, job execution, and record updates.
//!
//! The split mirrors where a failure is handled:
//! - [`TaskError`] is returned by the registry and surfaced to callers.
//! - [`JobError`] is produced by a work closure and becomes the task's
//!   error message.
//! - [`UpdateError`] comes from the dependent-record updater and is only
//!   ever logged by the runner.

use std::time::Duration;

use thiserror::Error;

use crate::task::{TaskKind, TaskStatus};

/// Failures of the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be decoded into its domain type.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// The in-memory store's lock was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    Poisoned,
}

/// Errors returned by [`TaskRegistry`](crate::TaskRegistry) operations.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task not found: {task_id}")]
    NotFound { task_id: String },

    #[error("{kind} target not found: {resource_id}")]
    ResourceNotFound { kind: TaskKind, resource_id: String },

    /// The task is already terminal (or the move would regress its status).
    #[error("invalid transition from {from} to {to} for task {task_id}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a work closure did not produce a result.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum JobError {
    /// Provider error, non-zero subprocess exit, or an explicit failure.
    #[error("{0}")]
    Failed(String),

    #[error("timed out after {}", format_limit(.0))]
    TimedOut(Duration),

    #[error("job panicked")]
    Panicked,

    #[error("job aborted")]
    Aborted,
}

impl JobError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Whole seconds as `{n}s`, anything finer as `{n}ms`.
fn format_limit(limit: &Duration) -> String {
    if limit.subsec_nanos() == 0 && limit.as_secs() > 0 {
        format!("{}s", limit.as_secs())
    } else {
        format!("{}ms", limit.as_millis())
    }
}

/// Failures while applying a task outcome to its dependent record.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("resource id '{resource_id}' is not valid for {kind}")]
    InvalidResourceId { kind: TaskKind, resource_id: String },

    #[error("result payload for {kind} is missing `{field}`")]
    MissingField { kind: TaskKind, field: &'static str },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let err = TaskError::NotFound {
            task_id: "abc".into(),
        };
        assert_eq!(err.to_string(), "task not found: abc");

        let err = TaskError::InvalidTransition {
            task_id: "t1".into(),
            from: TaskStatus::Completed,
            to: TaskStatus::Processing,
        };
        assert_eq!(
            err.to_string(),
            "invalid transition from completed to processing for task t1"
        );

        assert_eq!(
            JobError::TimedOut(Duration::from_secs(600)).to_string(),
            "timed out after 600s"
        );
        assert_eq!(
            JobError::TimedOut(Duration::from_millis(250)).to_string(),
            "timed out after 250ms"
        );
        assert_eq!(JobError::failed("ffmpeg exit 1").to_string(), "ffmpeg exit 1");
    }
}
