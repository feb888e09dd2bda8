//! Task records and the status state machine.
//!
//! ```text
//! Pending -> Processing, Completed, Failed
//! Processing -> Processing (progress), Completed, Failed
//! Completed, Failed -> (terminal)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumIter, EnumString};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::TaskError;

/// What a task does. Each kind owns exactly one dependent-record strategy.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
    ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskKind {
    ImageGeneration,
    VideoGeneration,
    VideoMerge,
    EpisodeFinalize,
}

/// Task lifecycle status. Transitions only move forward.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
    ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    /// `Completed` and `Failed` accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Processing => 1,
            Self::Completed | Self::Failed => 2,
        }
    }

    /// Returns `true` if moving from `self` to `next` keeps the status
    /// sequence non-decreasing. `Processing -> Processing` is the progress
    /// self-transition; every other self-transition is rejected.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        if self == next {
            return self == Self::Processing;
        }
        next.rank() > self.rank()
    }

    pub fn validate_transition(self, task_id: &str, next: Self) -> Result<(), TaskError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(TaskError::InvalidTransition {
                task_id: task_id.to_owned(),
                from: self,
                to: next,
            })
        }
    }
}

/// One unit of asynchronous work and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    /// 0-100. Frozen once the task is terminal.
    pub progress: u8,
    /// Latest human-readable progress note from the work closure.
    pub message: Option<String>,
    /// The business entity this task acts upon.
    pub resource_id: String,
    pub input: Option<Value>,
    /// Set only on `Completed`.
    pub result: Option<Value>,
    /// Set only on `Failed`.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// A fresh `pending` record with a random UUID.
    pub fn new(kind: TaskKind, resource_id: impl Into<String>, input: Option<Value>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            status: TaskStatus::Pending,
            progress: 0,
            message: None,
            resource_id: resource_id.into(),
            input,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Applies `transition` in place, validating it against the state machine.
    pub(crate) fn apply(&mut self, transition: Transition, now: DateTime<Utc>) -> Result<(), TaskError> {
        let next = transition.target();
        self.status.validate_transition(&self.id, next)?;
        // Starting twice would reset progress.
        if matches!(transition, Transition::Start) && self.status != TaskStatus::Pending {
            return Err(TaskError::InvalidTransition {
                task_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }

        match transition {
            Transition::Start => {
                self.progress = 0;
                self.started_at.get_or_insert(now);
            }
            Transition::Progress { progress, message } => {
                self.progress = self.progress.max(progress.min(100));
                if message.is_some() {
                    self.message = message;
                }
                self.started_at.get_or_insert(now);
            }
            Transition::Complete(result) => {
                self.progress = 100;
                self.result = Some(result);
                self.error = None;
                self.completed_at = Some(now);
            }
            Transition::Fail(error) => {
                self.error = Some(error);
                self.result = None;
                self.completed_at = Some(now);
            }
        }

        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}

/// A requested state change, validated by [`TaskRecord::apply`].
#[derive(Debug, Clone)]
pub(crate) enum Transition {
    Start,
    Progress { progress: u8, message: Option<String> },
    Complete(Value),
    Fail(String),
}

impl Transition {
    fn target(&self) -> TaskStatus {
        match self {
            Self::Start | Self::Progress { .. } => TaskStatus::Processing,
            Self::Complete(_) => TaskStatus::Completed,
            Self::Fail(_) => TaskStatus::Failed,
        }
    }
}

/// Filter for listing tasks. Results are always newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskQuery {
    pub resource_id: Option<String>,
    pub kind: Option<TaskKind>,
    pub status: Option<TaskStatus>,
    pub offset: u64,
    /// `None` returns every matching row.
    pub limit: Option<u64>,
}

impl TaskQuery {
    pub fn for_resource(resource_id: impl Into<String>) -> Self {
        Self {
            resource_id: Some(resource_id.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, task: &TaskRecord) -> bool {
        self.resource_id
            .as_deref()
            .is_none_or(|rid| rid == task.resource_id)
            && self.kind.is_none_or(|k| k == task.kind)
            && self.status.is_none_or(|s| s == task.status)
    }
}

/// One page of tasks plus the total number of matching rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPage {
    pub total: u64,
    pub items: Vec<TaskRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_strings_are_snake_case() {
        assert_eq!(TaskStatus::Processing.to_string(), "processing");
        assert_eq!("failed".parse::<TaskStatus>().unwrap(), TaskStatus::Failed);
        assert_eq!(TaskKind::EpisodeFinalize.as_ref(), "episode_finalize");
        assert_eq!(
            "video_merge".parse::<TaskKind>().unwrap(),
            TaskKind::VideoMerge
        );
        assert!("interrupted".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn forward_transitions_only() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Pending));
        assert!(!Processing.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Processing));
    }

    #[test]
    fn progress_never_decreases() {
        let mut task = TaskRecord::new(TaskKind::VideoMerge, "42", None);
        let now = Utc::now();
        task.apply(Transition::Progress { progress: 60, message: None }, now)
            .unwrap();
        task.apply(
            Transition::Progress {
                progress: 30,
                message: Some("stale".into()),
            },
            now,
        )
        .unwrap();
        assert_eq!(task.progress, 60);
        assert_eq!(task.message.as_deref(), Some("stale"));

        task.apply(Transition::Progress { progress: 250, message: None }, now)
            .unwrap();
        assert_eq!(task.progress, 100);
    }

    #[test]
    fn failure_freezes_progress_and_clears_result() {
        let mut task = TaskRecord::new(TaskKind::ImageGeneration, "7", None);
        let now = Utc::now();
        task.apply(Transition::Progress { progress: 40, message: None }, now)
            .unwrap();
        task.apply(Transition::Fail("provider down".into()), now)
            .unwrap();

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.progress, 40);
        assert!(task.result.is_none());
        assert_eq!(task.completed_at, Some(now));

        let err = task
            .apply(Transition::Complete(json!({"url": "late.png"})), now)
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { .. }));
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[test]
    fn query_matches_filters() {
        let task = TaskRecord::new(TaskKind::VideoMerge, "42", None);
        assert!(TaskQuery::default().matches(&task));
        assert!(TaskQuery::for_resource("42").matches(&task));
        assert!(!TaskQuery::for_resource("43").matches(&task));
        let by_kind = TaskQuery {
            kind: Some(TaskKind::ImageGeneration),
            ..TaskQuery::default()
        };
        assert!(!by_kind.matches(&task));
    }
}
