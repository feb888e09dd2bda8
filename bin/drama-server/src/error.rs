//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors become a JSON-body HTTP
//! response with an appropriate status code.
//!
//! Database errors are logged with full detail but only a generic message
//! is returned, so SQL and file paths never reach clients.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use drama_tasks::{StoreError, TaskError};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum ServerError {
    /// Propagated from the SQLite store.
    #[error("database error: {0}")]
    Database(#[from] StoreError),

    /// The caller referenced a task or record that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A task state change was rejected because the task already finished.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<TaskError> for ServerError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::NotFound { task_id } => Self::NotFound(format!("task {task_id} not found")),
            TaskError::ResourceNotFound { kind, resource_id } => {
                Self::NotFound(format!("{kind} target {resource_id} not found"))
            }
            err @ TaskError::InvalidTransition { .. } => Self::Conflict(err.to_string()),
            TaskError::Store(e) => Self::Database(e),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, client_message) = match &self {
            // Client-facing errors: expose the message directly.
            ServerError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),

            ServerError::Conflict(m) => {
                warn!(message = %m, "rejected task transition reached a handler");
                (StatusCode::CONFLICT, "task already finished".to_owned())
            }
            ServerError::Database(e) => {
                error!(error = %e, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
        };
        (status, Json(json!({ "error": client_message }))).into_response()
    }
}
