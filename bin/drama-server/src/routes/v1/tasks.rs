//! Task status endpoints.
//!
//! Clients poll these until the task they were handed reaches `completed`
//! or `failed`. Every handler is a plain read; none waits on running work.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use drama_tasks::TaskQuery;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::schemas::v1::task::{
    DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, ResourceTasksQuery, TaskListQuery, TaskPageResponse,
    TaskResponse, TaskStatusQuery,
};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(list_tasks, tasks_by_resource, task_status, get_task),
    components(schemas(TaskResponse, TaskPageResponse))
)]
pub struct TasksApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tasks", get(list_tasks))
        .route("/tasks/by-resource", get(tasks_by_resource))
        .route("/tasks/status", get(task_status))
        .route("/tasks/{id}", get(get_task))
}

#[utoipa::path(
    get,
    path = "/v1/tasks",
    tag = "tasks",
    params(TaskListQuery),
    responses(
        (status = 200, description = "Page of tasks, newest first", body = TaskPageResponse),
        (status = 400, description = "Invalid paging parameters"),
        (status = 500, description = "Backend error"),
    )
)]
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TaskListQuery>,
) -> Result<Json<TaskPageResponse>, ServerError> {
    let page = q.page.unwrap_or(1);
    let page_size = q.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    if page == 0 {
        return Err(ServerError::BadRequest("page starts at 1".into()));
    }
    if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
        return Err(ServerError::BadRequest(format!(
            "page_size must be between 1 and {MAX_PAGE_SIZE}"
        )));
    }

    let query = TaskQuery {
        resource_id: q.resource_id,
        kind: q.kind,
        status: q.status,
        offset: (page - 1).saturating_mul(page_size),
        limit: Some(page_size),
    };
    let result = state.runner.registry().query_tasks(&query).await?;
    Ok(Json(TaskPageResponse {
        items: result.items.into_iter().map(TaskResponse::from).collect(),
        total: result.total,
        page,
        page_size,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/tasks/by-resource",
    tag = "tasks",
    params(ResourceTasksQuery),
    responses(
        (status = 200, description = "Every task of the resource, newest first", body = [TaskResponse]),
        (status = 500, description = "Backend error"),
    )
)]
pub async fn tasks_by_resource(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ResourceTasksQuery>,
) -> Result<Json<Vec<TaskResponse>>, ServerError> {
    let query = TaskQuery {
        kind: q.kind,
        ..TaskQuery::for_resource(q.resource_id)
    };
    let tasks = state.runner.registry().query_tasks(&query).await?;
    Ok(Json(tasks.items.into_iter().map(TaskResponse::from).collect()))
}

#[utoipa::path(
    get,
    path = "/v1/tasks/status",
    tag = "tasks",
    params(TaskStatusQuery),
    responses(
        (status = 200, description = "Task retrieved", body = TaskResponse),
        (status = 404, description = "Task not found"),
        (status = 500, description = "Backend error"),
    )
)]
pub async fn task_status(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TaskStatusQuery>,
) -> Result<Json<TaskResponse>, ServerError> {
    let task = state.runner.registry().get_task(&q.task_id).await?;
    Ok(Json(task.into()))
}

#[utoipa::path(
    get,
    path = "/v1/tasks/{id}",
    tag = "tasks",
    params(
        ("id" = String, Path, description = "Task id returned when the work was submitted")
    ),
    responses(
        (status = 200, description = "Task retrieved", body = TaskResponse),
        (status = 404, description = "Task not found"),
        (status = 500, description = "Backend error"),
    )
)]
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskResponse>, ServerError> {
    let task = state.runner.registry().get_task(&id).await?;
    Ok(Json(task.into()))
}
