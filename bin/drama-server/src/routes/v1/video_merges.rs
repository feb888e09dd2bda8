use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use drama_tasks::TaskKind;
use drama_tasks::records::NewVideoMerge;
use drama_tasks::store::RecordStore;
use serde_json::json;
use tracing::info;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::schemas::v1::task::TaskCreatedResponse;
use crate::schemas::v1::video_merge::{CreateVideoMergeRequest, VideoMergeResponse};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(create_video_merge, get_video_merge),
    components(schemas(CreateVideoMergeRequest, VideoMergeResponse))
)]
pub struct VideoMergesApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/video-merges", post(create_video_merge))
        .route("/video-merges/{id}", get(get_video_merge))
}

#[utoipa::path(
    post,
    path = "/v1/video-merges",
    tag = "video-merges",
    request_body = CreateVideoMergeRequest,
    responses(
        (status = 202, description = "Merge started", body = TaskCreatedResponse),
        (status = 400, description = "No clips given"),
        (status = 500, description = "Backend error"),
    )
)]
pub async fn create_video_merge(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateVideoMergeRequest>,
) -> Result<(StatusCode, Json<TaskCreatedResponse>), ServerError> {
    if req.clips.is_empty() || req.clips.iter().any(|c| c.trim().is_empty()) {
        return Err(ServerError::BadRequest("clips must be non-empty paths".into()));
    }

    let merge = state
        .store
        .insert_video_merge(NewVideoMerge {
            episode_id: req.episode_id,
            drama_id: req.drama_id,
            title: req.title,
            clips: req.clips,
        })
        .await?;

    let output_name = format!("merge_{}", merge.id);
    let clips = merge.clips.clone();
    let merger = Arc::clone(&state.merger);
    let task = state
        .runner
        .submit(
            TaskKind::VideoMerge,
            &merge.id.to_string(),
            Some(json!({ "clips": clips, "output": output_name })),
            move |reporter| async move { merger.merge_clips(&clips, &output_name, &reporter).await },
        )
        .await?;

    info!(task_id = %task.id, merge_id = merge.id, clips = merge.clips.len(), "video merge submitted");
    Ok((StatusCode::ACCEPTED, Json(TaskCreatedResponse::from(&task))))
}

#[utoipa::path(
    get,
    path = "/v1/video-merges/{id}",
    tag = "video-merges",
    params(("id" = i64, Path, description = "Merge record id")),
    responses(
        (status = 200, description = "Merge record retrieved", body = VideoMergeResponse),
        (status = 404, description = "Merge record not found"),
        (status = 500, description = "Backend error"),
    )
)]
pub async fn get_video_merge(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<VideoMergeResponse>, ServerError> {
    let merge = state
        .store
        .get_video_merge(id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("video merge {id} not found")))?;
    Ok(Json(merge.into()))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::routes::testing::{app, send};

    #[tokio::test]
    async fn video_merge_requires_clips() {
        let app = app().await;
        let (status, _) = send(
            &app,
            Method::POST,
            "/v1/video-merges",
            Some(json!({ "episode_id": 1, "drama_id": 1, "clips": [] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, Method::GET, "/v1/video-merges/5", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
