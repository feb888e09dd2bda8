use chrono::SecondsFormat;
use drama_tasks::provider::{ImageRequest, VideoRequest};
use drama_tasks::records::{Generation, JobStatus, MediaKind};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct ImageGenerationRequest {
    pub drama_id: i64,
    pub episode_id: Option<i64>,
    #[serde(flatten)]
    pub request: ImageRequest,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VideoGenerationRequest {
    pub drama_id: i64,
    /// Completed video generations of an episode become its finalize clips.
    pub episode_id: Option<i64>,
    #[serde(flatten)]
    pub request: VideoRequest,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct GenerationResponse {
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
    pub created_at: String,
    pub completed_at: Option<String>,
}

impl From<Generation> for GenerationResponse {
    fn from(g: Generation) -> Self {
        Self {
            id: g.id,
            media: g.media,
            drama_id: g.drama_id,
            episode_id: g.episode_id,
            provider: g.provider,
            prompt: g.prompt,
            status: g.status,
            url: g.url,
            task_id: g.task_id,
            error_msg: g.error_msg,
            created_at: g.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            completed_at: g
                .completed_at
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true)),
        }
    }
}
