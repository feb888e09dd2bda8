use chrono::SecondsFormat;
use drama_tasks::records::{JobStatus, VideoMerge};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateVideoMergeRequest {
    pub episode_id: i64,
    pub drama_id: i64,
    pub title: Option<String>,
    /// Clip paths or URLs, in playback order.
    pub clips: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VideoMergeResponse {
    pub id: i64,
    pub episode_id: i64,
    pub drama_id: i64,
    pub title: Option<String>,
    pub status: JobStatus,
    pub clips: Vec<String>,
    pub merged_url: Option<String>,
    pub duration: Option<f64>,
    pub task_id: Option<String>,
    pub error_msg: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

impl From<VideoMerge> for VideoMergeResponse {
    fn from(m: VideoMerge) -> Self {
        Self {
            id: m.id,
            episode_id: m.episode_id,
            drama_id: m.drama_id,
            title: m.title,
            status: m.status,
            clips: m.clips,
            merged_url: m.merged_url,
            duration: m.duration,
            task_id: m.task_id,
            error_msg: m.error_msg,
            created_at: m.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            completed_at: m
                .completed_at
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true)),
        }
    }
}
