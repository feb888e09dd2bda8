//! Episode endpoints, including finalization into a single video.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use drama_tasks::TaskKind;
use drama_tasks::records::NewEpisode;
use drama_tasks::store::RecordStore;
use serde_json::json;
use tracing::info;
use utoipa::OpenApi;
use uuid::Uuid;

use crate::error::ServerError;
use crate::schemas::v1::episode::{
    CreateEpisodeRequest, EpisodeResponse, FinalizeEpisodeRequest, TimelineClip, TimelineData,
};
use crate::schemas::v1::task::TaskCreatedResponse;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(create_episode, get_episode, finalize_episode),
    components(schemas(
        CreateEpisodeRequest,
        EpisodeResponse,
        FinalizeEpisodeRequest,
        TimelineData,
        TimelineClip,
        TaskCreatedResponse
    ))
)]
pub struct EpisodesApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/episodes", post(create_episode))
        .route("/episodes/{id}", get(get_episode))
        .route("/episodes/{id}/finalize", post(finalize_episode))
}

#[utoipa::path(
    post,
    path = "/v1/episodes",
    tag = "episodes",
    request_body = CreateEpisodeRequest,
    responses(
        (status = 201, description = "Episode created as draft", body = EpisodeResponse),
        (status = 400, description = "Bad request"),
        (status = 500, description = "Backend error"),
    )
)]
pub async fn create_episode(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateEpisodeRequest>,
) -> Result<(StatusCode, Json<EpisodeResponse>), ServerError> {
    if req.title.trim().is_empty() {
        return Err(ServerError::BadRequest("title must not be empty".into()));
    }
    let episode = state
        .store
        .insert_episode(NewEpisode {
            drama_id: req.drama_id,
            episode_number: req.episode_number,
            title: req.title,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(episode.into())))
}

#[utoipa::path(
    get,
    path = "/v1/episodes/{id}",
    tag = "episodes",
    params(("id" = i64, Path, description = "Episode id")),
    responses(
        (status = 200, description = "Episode retrieved", body = EpisodeResponse),
        (status = 404, description = "Episode not found"),
        (status = 500, description = "Backend error"),
    )
)]
pub async fn get_episode(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<EpisodeResponse>, ServerError> {
    let episode = state
        .store
        .get_episode(id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("episode {id} not found")))?;
    Ok(Json(episode.into()))
}

/// Merges the episode's clips into its final video.
///
/// The body is optional. When it carries clips they are merged in their
/// `order`; otherwise the episode's completed video generations are used.
#[utoipa::path(
    post,
    path = "/v1/episodes/{id}/finalize",
    tag = "episodes",
    params(("id" = i64, Path, description = "Episode id")),
    request_body(content = Option<FinalizeEpisodeRequest>, description = "Optional clip timeline"),
    responses(
        (status = 202, description = "Finalization started", body = TaskCreatedResponse),
        (status = 400, description = "No clips to merge or malformed body"),
        (status = 404, description = "Episode not found"),
        (status = 500, description = "Backend error"),
    )
)]
pub async fn finalize_episode(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    body: Bytes,
) -> Result<(StatusCode, Json<TaskCreatedResponse>), ServerError> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        FinalizeEpisodeRequest::default()
    } else {
        serde_json::from_slice::<FinalizeEpisodeRequest>(&body)
            .map_err(|e| ServerError::BadRequest(format!("invalid finalize body: {e}")))?
    };

    if state.store.get_episode(id).await?.is_none() {
        return Err(ServerError::NotFound(format!("episode {id} not found")));
    }
    let clips = match request.ordered_clips() {
        Some(clips) => {
            if clips.iter().any(|c| c.trim().is_empty()) {
                return Err(ServerError::BadRequest("clip video_url must not be empty".into()));
            }
            clips
        }
        None => state.store.episode_clips(id).await?,
    };
    if clips.is_empty() {
        return Err(ServerError::BadRequest(format!(
            "episode {id} has no completed video clips"
        )));
    }

    let output_name = format!("episode_{id}_{}", &Uuid::new_v4().simple().to_string()[..8]);
    let merger = Arc::clone(&state.merger);
    let input = json!({ "clips": clips, "output": output_name });
    let task = state
        .runner
        .submit(
            TaskKind::EpisodeFinalize,
            &id.to_string(),
            Some(input),
            move |reporter| async move { merger.merge_clips(&clips, &output_name, &reporter).await },
        )
        .await?;

    info!(task_id = %task.id, episode_id = id, "episode finalization submitted");
    Ok((StatusCode::ACCEPTED, Json(TaskCreatedResponse::from(&task))))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::routes::testing::{app, send, wait_terminal};

    #[tokio::test]
    async fn finalize_without_clips_is_rejected() {
        let app = app().await;
        let (status, _) = send(&app, Method::POST, "/v1/episodes/99/finalize", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, episode) = send(
            &app,
            Method::POST,
            "/v1/episodes",
            Some(json!({ "drama_id": 1, "episode_number": 1, "title": "Pilot" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = send(
            &app,
            Method::POST,
            &format!("/v1/episodes/{}/finalize", episode["id"]),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn failed_finalize_reverts_episode_to_draft() {
        let app = app().await;
        let (_, episode) = send(
            &app,
            Method::POST,
            "/v1/episodes",
            Some(json!({ "drama_id": 1, "episode_number": 2, "title": "Storm" })),
        )
        .await;
        let episode_id = episode["id"].as_i64().unwrap();

        let (status, video) = send(
            &app,
            Method::POST,
            "/v1/videos/generations",
            Some(json!({ "drama_id": 1, "episode_id": episode_id, "prompt": "waves", "duration": 5 })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let video_task = wait_terminal(&app, video["task_id"].as_str().unwrap()).await;
        assert_eq!(video_task["status"], "completed");
        assert_eq!(video_task["result"]["remote_task_id"], "remote-1");

        let (status, created) = send(
            &app,
            Method::POST,
            &format!("/v1/episodes/{episode_id}/finalize"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let task = wait_terminal(&app, created["task_id"].as_str().unwrap()).await;
        assert_eq!(task["status"], "failed");
        assert!(task["error"].as_str().unwrap().contains("ffmpeg"));
        assert!(task["result"].is_null());

        let (_, episode) = send(&app, Method::GET, &format!("/v1/episodes/{episode_id}"), None).await;
        assert_eq!(episode["status"], "draft");
        assert!(episode["video_url"].is_null());
        assert!(episode["error_msg"].as_str().unwrap().contains("ffmpeg"));
    }

    #[tokio::test]
    async fn finalize_uses_clips_from_the_body() {
        let app = app().await;
        let (_, episode) = send(
            &app,
            Method::POST,
            "/v1/episodes",
            Some(json!({ "drama_id": 1, "episode_number": 3, "title": "Harbor" })),
        )
        .await;
        let uri = format!("/v1/episodes/{}/finalize", episode["id"]);

        let (status, _) = send(&app, Method::POST, &uri, Some(json!({ "clips": [] }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(
            &app,
            Method::POST,
            &uri,
            Some(json!({ "clips": [{ "video_url": " ", "order": 0 }] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(&app, Method::POST, &uri, Some(json!({ "clips": "nope" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, created) = send(
            &app,
            Method::POST,
            &uri,
            Some(json!({
                "timeline_data": { "clips": [
                    { "video_url": "https://cdn.test/2.mp4", "order": 1 },
                    { "video_url": "https://cdn.test/1.mp4", "order": 0 }
                ] }
            })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let task = wait_terminal(&app, created["task_id"].as_str().unwrap()).await;
        assert_eq!(task["kind"], "episode_finalize");
        assert_eq!(task["status"], "failed");
        assert!(task["error"].as_str().unwrap().contains("ffmpeg"));
    }
}
