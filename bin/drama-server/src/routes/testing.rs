//! Shared fixtures for route tests: the full router over an in-memory
//! SQLite store and a scripted provider.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use drama_tasks::provider::{ImageRequest, MediaProvider, ProviderError, VideoPoll, VideoRequest};
use drama_tasks::store::SqliteStore;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use crate::config::Config;
use crate::state::AppState;

pub(crate) struct FakeProvider;

#[async_trait]
impl MediaProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn generate_image(&self, request: &ImageRequest) -> Result<String, ProviderError> {
        Ok(format!("https://cdn.test/{}.png", request.prompt.len()))
    }

    async fn submit_video(&self, _request: &VideoRequest) -> Result<String, ProviderError> {
        Ok("remote-1".into())
    }

    async fn poll_video(&self, _remote_id: &str) -> Result<VideoPoll, ProviderError> {
        Ok(VideoPoll::Succeeded {
            url: "https://cdn.test/clip.mp4".into(),
        })
    }
}

pub(crate) async fn app() -> Router {
    let storage = std::env::temp_dir().join(format!("drama-server-{}", uuid::Uuid::new_v4()));
    let vars: HashMap<&str, String> = HashMap::from([
        ("DRAMA_DATABASE_URL", "sqlite::memory:".to_owned()),
        ("DRAMA_STORAGE_DIR", storage.display().to_string()),
        ("DRAMA_FFMPEG", "/nonexistent/ffmpeg".to_owned()),
        ("DRAMA_FFPROBE", "/nonexistent/ffprobe".to_owned()),
        ("DRAMA_VIDEO_POLL_SECS", "0".to_owned()),
        ("DRAMA_ENABLE_SWAGGER", "false".to_owned()),
    ]);
    let config = Config::from_lookup(|key| vars.get(key).cloned());
    let store = SqliteStore::connect(&config.database_url).await.unwrap();
    let state = AppState::new(config, store, Arc::new(FakeProvider));
    super::build(Arc::new(state))
}

pub(crate) async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

/// Waits until the task is terminal and its job, including the record
/// update that follows, has left the runner.
pub(crate) async fn wait_terminal(app: &Router, task_id: &str) -> Value {
    for _ in 0..200 {
        let (status, task) = send(app, Method::GET, &format!("/v1/tasks/{task_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, health) = send(app, Method::GET, "/health", None).await;
        let finished = task["status"] == "completed" || task["status"] == "failed";
        if finished && health["in_flight_jobs"] == 0 {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {task_id} never finished");
}
