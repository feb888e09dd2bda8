use chrono::SecondsFormat;
use drama_tasks::{TaskKind, TaskRecord, TaskStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};

pub const DEFAULT_PAGE_SIZE: u64 = 20;
pub const MAX_PAGE_SIZE: u64 = 100;

#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct TaskStatusQuery {
    pub task_id: String,
}

#[derive(Debug, Default, Deserialize, ToSchema, IntoParams)]
pub struct TaskListQuery {
    pub resource_id: Option<String>,
    pub kind: Option<TaskKind>,
    pub status: Option<TaskStatus>,
    /// 1-based page number (default 1).
    pub page: Option<u64>,
    /// Items per page, 1 to 100 (default 20).
    pub page_size: Option<u64>,
}

#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct ResourceTasksQuery {
    pub resource_id: String,
    pub kind: Option<TaskKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TaskResponse {
    pub task_id: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub progress: u8,
    pub message: Option<String>,
    pub resource_id: String,
    pub error: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub result: Option<Value>,
    pub created_at: String,
    pub updated_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl From<TaskRecord> for TaskResponse {
    fn from(task: TaskRecord) -> Self {
        let ts = |t: chrono::DateTime<chrono::Utc>| t.to_rfc3339_opts(SecondsFormat::Secs, true);
        Self {
            task_id: task.id,
            kind: task.kind,
            status: task.status,
            progress: task.progress,
            message: task.message,
            resource_id: task.resource_id,
            error: task.error,
            result: task.result,
            created_at: ts(task.created_at),
            updated_at: ts(task.updated_at),
            started_at: task.started_at.map(ts),
            completed_at: task.completed_at.map(ts),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TaskPageResponse {
    pub items: Vec<TaskResponse>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
}

/// Returned by every endpoint that starts background work.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TaskCreatedResponse {
    pub task_id: String,
    pub status: TaskStatus,
    pub resource_id: String,
}

impl From<&TaskRecord> for TaskCreatedResponse {
    fn from(task: &TaskRecord) -> Self {
        Self {
            task_id: task.id.clone(),
            status: task.status,
            resource_id: task.resource_id.clone(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_uses_snake_case_enums() {
        let task = TaskRecord::new(TaskKind::EpisodeFinalize, "3", None);
        let body = serde_json::to_value(TaskResponse::from(task)).unwrap();
        assert_eq!(body["kind"], json!("episode_finalize"));
        assert_eq!(body["status"], json!("pending"));
        assert_eq!(body["progress"], json!(0));
        assert!(body["result"].is_null());
        assert!(body["created_at"].as_str().unwrap().ends_with('Z'));
    }
}
