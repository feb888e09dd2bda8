//! Image and video generation endpoints backed by the configured provider.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use drama_tasks::TaskKind;
use drama_tasks::provider::{run_image_generation, run_video_generation};
use drama_tasks::records::{MediaKind, NewGeneration};
use drama_tasks::store::RecordStore;
use tracing::info;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::schemas::v1::generation::{
    GenerationResponse, ImageGenerationRequest, VideoGenerationRequest,
};
use crate::schemas::v1::task::TaskCreatedResponse;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(generate_image, generate_video, get_generation),
    components(schemas(ImageGenerationRequest, VideoGenerationRequest, GenerationResponse))
)]
pub struct GenerationsApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/images/generations", post(generate_image))
        .route("/videos/generations", post(generate_video))
        .route("/generations/{id}", get(get_generation))
}

fn require_prompt(prompt: &str) -> Result<(), ServerError> {
    if prompt.trim().is_empty() {
        return Err(ServerError::BadRequest("prompt must not be empty".into()));
    }
    Ok(())
}

#[utoipa::path(
    post,
    path = "/v1/images/generations",
    tag = "generations",
    request_body = ImageGenerationRequest,
    responses(
        (status = 202, description = "Image generation started", body = TaskCreatedResponse),
        (status = 400, description = "Bad request"),
        (status = 500, description = "Backend error"),
    )
)]
pub async fn generate_image(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ImageGenerationRequest>,
) -> Result<(StatusCode, Json<TaskCreatedResponse>), ServerError> {
    require_prompt(&req.request.prompt)?;
    let generation = state
        .store
        .insert_generation(NewGeneration {
            media: MediaKind::Image,
            drama_id: req.drama_id,
            episode_id: req.episode_id,
            provider: state.provider.name().to_owned(),
            prompt: req.request.prompt.clone(),
        })
        .await?;

    let provider = Arc::clone(&state.provider);
    let request = req.request;
    let input = serde_json::to_value(&request).ok();
    let task = state
        .runner
        .submit(
            TaskKind::ImageGeneration,
            &generation.id.to_string(),
            input,
            move |reporter| async move {
                run_image_generation(provider.as_ref(), &request, &reporter).await
            },
        )
        .await?;

    info!(task_id = %task.id, generation_id = generation.id, "image generation submitted");
    Ok((StatusCode::ACCEPTED, Json(TaskCreatedResponse::from(&task))))
}

#[utoipa::path(
    post,
    path = "/v1/videos/generations",
    tag = "generations",
    request_body = VideoGenerationRequest,
    responses(
        (status = 202, description = "Video generation started", body = TaskCreatedResponse),
        (status = 400, description = "Bad request"),
        (status = 500, description = "Backend error"),
    )
)]
pub async fn generate_video(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VideoGenerationRequest>,
) -> Result<(StatusCode, Json<TaskCreatedResponse>), ServerError> {
    require_prompt(&req.request.prompt)?;
    let generation = state
        .store
        .insert_generation(NewGeneration {
            media: MediaKind::Video,
            drama_id: req.drama_id,
            episode_id: req.episode_id,
            provider: state.provider.name().to_owned(),
            prompt: req.request.prompt.clone(),
        })
        .await?;

    let provider = Arc::clone(&state.provider);
    let poll = state.poll.clone();
    let request = req.request;
    let input = serde_json::to_value(&request).ok();
    let task = state
        .runner
        .submit(
            TaskKind::VideoGeneration,
            &generation.id.to_string(),
            input,
            move |reporter| async move {
                run_video_generation(provider.as_ref(), &request, &poll, &reporter).await
            },
        )
        .await?;

    info!(task_id = %task.id, generation_id = generation.id, "video generation submitted");
    Ok((StatusCode::ACCEPTED, Json(TaskCreatedResponse::from(&task))))
}

#[utoipa::path(
    get,
    path = "/v1/generations/{id}",
    tag = "generations",
    params(("id" = i64, Path, description = "Generation record id")),
    responses(
        (status = 200, description = "Generation retrieved", body = GenerationResponse),
        (status = 404, description = "Generation not found"),
        (status = 500, description = "Backend error"),
    )
)]
pub async fn get_generation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<GenerationResponse>, ServerError> {
    let generation = state
        .store
        .get_generation(id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("generation {id} not found")))?;
    Ok(Json(generation.into()))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::routes::testing::{app, send, wait_terminal};

    #[tokio::test]
    async fn image_generation_completes_and_updates_record() {
        let app = app().await;
        let (status, created) = send(
            &app,
            Method::POST,
            "/v1/images/generations",
            Some(json!({ "drama_id": 1, "prompt": "a lighthouse at dusk" })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(created["status"], "pending");
        let task_id = created["task_id"].as_str().unwrap().to_owned();
        let generation_id = created["resource_id"].as_str().unwrap().to_owned();

        let task = wait_terminal(&app, &task_id).await;
        assert_eq!(task["status"], "completed");
        assert_eq!(task["progress"], 100);
        assert_eq!(task["kind"], "image_generation");
        assert_eq!(task["result"]["url"], "https://cdn.test/20.png");

        let (_, generation) = send(&app, Method::GET, &format!("/v1/generations/{generation_id}"), None).await;
        assert_eq!(generation["status"], "completed");
        assert_eq!(generation["url"], "https://cdn.test/20.png");
        assert_eq!(generation["task_id"], task_id.as_str());

        let (_, tasks) = send(
            &app,
            Method::GET,
            &format!("/v1/tasks/by-resource?resource_id={generation_id}&kind=image_generation"),
            None,
        )
        .await;
        assert_eq!(tasks.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected_without_a_task() {
        let app = app().await;
        let (status, _) = send(
            &app,
            Method::POST,
            "/v1/images/generations",
            Some(json!({ "drama_id": 1, "prompt": "  " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (_, page) = send(&app, Method::GET, "/v1/tasks", None).await;
        assert_eq!(page["total"], 0);
    }
}
