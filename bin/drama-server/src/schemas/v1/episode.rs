use chrono::SecondsFormat;
use drama_tasks::records::{Episode, EpisodeStatus};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateEpisodeRequest {
    pub drama_id: i64,
    pub episode_number: i64,
    pub title: String,
}

/// Optional body of `POST /v1/episodes/{id}/finalize`.
///
/// Clips come either directly under `clips` or inside `timeline_data`.
/// Without either, the episode's completed video generations are used.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct FinalizeEpisodeRequest {
    pub clips: Option<Vec<TimelineClip>>,
    pub timeline_data: Option<TimelineData>,
}

impl FinalizeEpisodeRequest {
    /// Caller-supplied clip URLs in playback order, if any were given.
    pub fn ordered_clips(self) -> Option<Vec<String>> {
        let mut clips = self.clips.or(self.timeline_data.and_then(|t| t.clips))?;
        clips.sort_by_key(|c| c.order);
        Some(clips.into_iter().map(|c| c.video_url).collect())
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TimelineData {
    pub clips: Option<Vec<TimelineClip>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TimelineClip {
    pub video_url: String,
    /// Position in the final cut; ties keep request order.
    #[serde(default)]
    pub order: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EpisodeResponse {
    pub id: i64,
    pub drama_id: i64,
    pub episode_number: i64,
    pub title: String,
    pub status: EpisodeStatus,
    pub video_url: Option<String>,
    pub duration: Option<f64>,
    pub error_msg: Option<String>,
    /// Task currently tracked for this episode.
    pub task_id: Option<String>,
    pub created_at: String,
}

impl From<Episode> for EpisodeResponse {
    fn from(e: Episode) -> Self {
        Self {
            id: e.id,
            drama_id: e.drama_id,
            episode_number: e.episode_number,
            title: e.title,
            status: e.status,
            video_url: e.video_url,
            duration: e.duration,
            error_msg: e.error_msg,
            task_id: e.task_id,
            created_at: e.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}
