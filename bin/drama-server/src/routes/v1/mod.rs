pub mod episodes;
pub mod generations;
pub mod tasks;
pub mod video_merges;

use std::sync::Arc;

use axum::Router;
use utoipa::OpenApi;

use crate::state::AppState;

/// Routes nested under `/v1`.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(tasks::router())
        .merge(episodes::router())
        .merge(video_merges::router())
        .merge(generations::router())
}

#[derive(OpenApi)]
#[openapi()]
pub struct V1Api;

pub fn api_docs() -> utoipa::openapi::OpenApi {
    let mut spec = V1Api::openapi();
    spec.merge(tasks::TasksApi::openapi());
    spec.merge(episodes::EpisodesApi::openapi());
    spec.merge(video_merges::VideoMergesApi::openapi());
    spec.merge(generations::GenerationsApi::openapi());
    spec
}
