//! Business records whose state follows a task's outcome.
//!
//! Each record carries a `task_id` column pointing at the task the client is
//! currently tracking for it. Outcome writes are compare-and-set on that
//! column, so a superseded task can never overwrite a newer one's result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use crate::error::UpdateError;
use crate::task::{TaskKind, TaskRecord};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EpisodeStatus {
    /// Editable; the state an episode returns to when finalization fails.
    Draft,
    Processing,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: i64,
    pub drama_id: i64,
    pub episode_number: i64,
    pub title: String,
    pub status: EpisodeStatus,
    pub video_url: Option<String>,
    pub duration: Option<f64>,
    pub error_msg: Option<String>,
    pub task_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewEpisode {
    pub drama_id: i64,
    pub episode_number: i64,
    pub title: String,
}

/// Status shared by merge and generation records.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMerge {
    pub id: i64,
    pub episode_id: i64,
    pub drama_id: i64,
    pub title: Option<String>,
    pub status: JobStatus,
    /// Ordered clip paths or URLs.
    pub clips: Vec<String>,
    pub merged_url: Option<String>,
    pub duration: Option<f64>,
    pub task_id: Option<String>,
    pub error_msg: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewVideoMerge {
    pub episode_id: i64,
    pub drama_id: i64,
    pub title: Option<String>,
    pub clips: Vec<String>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

/// An image or video generation request and its produced media.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub id: i64,
    pub media: MediaKind,
    pub drama_id: i64,
    pub episode_id: Option<i64>,
    pub provider: String,
    pub prompt: String,
    pub status: JobStatus,
    pub url: Option<String>,
    pub task_id: Option<String>,
    pub error_msg: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewGeneration {
    pub media: MediaKind,
    pub drama_id: i64,
    pub episode_id: Option<i64>,
    pub provider: String,
    pub prompt: String,
}

/// Which record a task's outcome lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceRef {
    Episode(i64),
    VideoMerge(i64),
    Generation(i64),
}

impl ResourceRef {
    /// Resolves the record a task targets from its kind and resource id.
    pub fn for_task(task: &TaskRecord) -> Result<Self, UpdateError> {
        let id: i64 = task
            .resource_id
            .trim()
            .parse()
            .map_err(|_| UpdateError::InvalidResourceId {
                kind: task.kind,
                resource_id: task.resource_id.clone(),
            })?;
        Ok(match task.kind {
            TaskKind::EpisodeFinalize => Self::Episode(id),
            TaskKind::VideoMerge => Self::VideoMerge(id),
            TaskKind::ImageGeneration | TaskKind::VideoGeneration => Self::Generation(id),
        })
    }

    pub fn id(self) -> i64 {
        match self {
            Self::Episode(id) | Self::VideoMerge(id) | Self::Generation(id) => id,
        }
    }
}

/// Outcome of pointing a record at a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Bound,
    /// The record already tracks a task created after this one and was left
    /// alone.
    Superseded,
    Missing,
}

/// A mutation produced by the updater for one record kind.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordChange {
    EpisodeFinalized { video_url: String, duration: Option<f64> },
    /// Back to `draft` with an error note.
    EpisodeReverted { error: String },
    MergeCompleted { merged_url: String, duration: Option<f64> },
    MergeFailed { error: String },
    GenerationCompleted { url: String },
    GenerationFailed { error: String },
}
