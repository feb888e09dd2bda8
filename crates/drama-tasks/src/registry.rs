//! Task bookkeeping.
//!
//! Every mutation reads the current record, validates the transition against
//! the state machine, then writes it back with a compare-and-set on the
//! status it read. A writer that loses the race re-reads and re-validates, so
//! once a task is terminal every later writer gets
//! [`TaskError::InvalidTransition`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::error::TaskError;
use crate::store::TaskStore;
use crate::task::{TaskKind, TaskPage, TaskQuery, TaskRecord, Transition};

/// Concurrent writers re-read this many times before giving up.
const MAX_CAS_ATTEMPTS: usize = 3;

pub struct TaskRegistry<S> {
    store: Arc<S>,
}

impl<S> Clone for TaskRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: TaskStore> TaskRegistry<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Persists a new `pending` task and returns its id.
    pub async fn create_task(&self, kind: TaskKind, resource_id: &str) -> Result<String, TaskError> {
        self.create_task_with_input(kind, resource_id, None)
            .await
            .map(|task| task.id)
    }

    /// Like [`create_task`](Self::create_task) but records the request input
    /// and returns the whole record.
    pub async fn create_task_with_input(
        &self,
        kind: TaskKind,
        resource_id: &str,
        input: Option<Value>,
    ) -> Result<TaskRecord, TaskError> {
        let task = TaskRecord::new(kind, resource_id, input);
        self.store.insert_task(&task).await?;
        debug!(task_id = %task.id, %kind, resource_id, "task created");
        Ok(task)
    }

    pub async fn get_task(&self, task_id: &str) -> Result<TaskRecord, TaskError> {
        self.store
            .get_task(task_id)
            .await?
            .ok_or_else(|| TaskError::NotFound {
                task_id: task_id.to_owned(),
            })
    }

    /// Every task for `resource_id`, newest first.
    pub async fn list_tasks(&self, resource_id: &str) -> Result<Vec<TaskRecord>, TaskError> {
        Ok(self
            .store
            .query_tasks(&TaskQuery::for_resource(resource_id))
            .await?
            .items)
    }

    pub async fn query_tasks(&self, query: &TaskQuery) -> Result<TaskPage, TaskError> {
        Ok(self.store.query_tasks(query).await?)
    }

    /// `pending -> processing` with progress reset to 0.
    pub async fn start_task(&self, task_id: &str) -> Result<TaskRecord, TaskError> {
        self.transition(task_id, Transition::Start).await
    }

    pub async fn update_progress(&self, task_id: &str, progress: u8) -> Result<TaskRecord, TaskError> {
        self.report_progress(task_id, progress, None).await
    }

    /// Moves a `pending` task to `processing` on first call. Progress is
    /// clamped to 100 and never lowered; `message` replaces the previous one
    /// when present.
    pub async fn report_progress(
        &self,
        task_id: &str,
        progress: u8,
        message: Option<String>,
    ) -> Result<TaskRecord, TaskError> {
        self.transition(task_id, Transition::Progress { progress, message })
            .await
    }

    pub async fn complete_task(&self, task_id: &str, result: Value) -> Result<TaskRecord, TaskError> {
        self.transition(task_id, Transition::Complete(result)).await
    }

    /// Records the failure; progress stays at its last reported value.
    pub async fn fail_task(
        &self,
        task_id: &str,
        error: impl Into<String>,
    ) -> Result<TaskRecord, TaskError> {
        self.transition(task_id, Transition::Fail(error.into())).await
    }

    /// Tasks a previous process left `pending` or `processing`.
    pub async fn unfinished_tasks(&self) -> Result<Vec<TaskRecord>, TaskError> {
        Ok(self.store.unfinished_tasks().await?)
    }

    /// Deletes terminal tasks completed before `cutoff`.
    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, TaskError> {
        Ok(self.store.delete_terminal_before(cutoff).await?)
    }

    async fn transition(&self, task_id: &str, transition: Transition) -> Result<TaskRecord, TaskError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut task = self.get_task(task_id).await?;
            let expected = task.status;
            task.apply(transition.clone(), Utc::now())?;

            if self.store.update_task_if_status(&task, expected).await? {
                return Ok(task);
            }
            if attempt >= MAX_CAS_ATTEMPTS {
                // Still losing after several re-reads; report against whatever
                // the row holds now.
                let current = self.get_task(task_id).await?;
                return Err(TaskError::InvalidTransition {
                    task_id: task_id.to_owned(),
                    from: current.status,
                    to: task.status,
                });
            }
            debug!(task_id, attempt, "task changed concurrently; retrying");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::task::TaskStatus;
    use serde_json::json;

    fn registry() -> TaskRegistry<MemoryStore> {
        TaskRegistry::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn create_then_get() {
        let registry = registry();
        let id = registry.create_task(TaskKind::VideoMerge, "42").await.unwrap();

        let task = registry.get_task(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress, 0);
        assert_eq!(task.resource_id, "42");
        assert!(task.result.is_none() && task.error.is_none());
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let err = registry().get_task("nope").await.unwrap_err();
        assert!(matches!(err, TaskError::NotFound { task_id } if task_id == "nope"));
    }

    #[tokio::test]
    async fn first_progress_moves_to_processing() {
        let registry = registry();
        let id = registry.create_task(TaskKind::ImageGeneration, "1").await.unwrap();

        let task = registry.update_progress(&id, 10).await.unwrap();
        assert_eq!(task.status, TaskStatus::Processing);
        assert!(task.started_at.is_some());

        let task = registry
            .report_progress(&id, 5, Some("uploading".into()))
            .await
            .unwrap();
        assert_eq!(task.progress, 10);
        assert_eq!(task.message.as_deref(), Some("uploading"));
    }

    #[tokio::test]
    async fn terminal_tasks_reject_everything() {
        let registry = registry();
        let id = registry.create_task(TaskKind::VideoMerge, "42").await.unwrap();
        registry.complete_task(&id, json!({"url": "a.mp4"})).await.unwrap();

        assert!(matches!(
            registry.fail_task(&id, "late").await,
            Err(TaskError::InvalidTransition { .. })
        ));
        assert!(matches!(
            registry.update_progress(&id, 50).await,
            Err(TaskError::InvalidTransition { .. })
        ));
        assert!(matches!(
            registry.complete_task(&id, json!({"url": "b.mp4"})).await,
            Err(TaskError::InvalidTransition { .. })
        ));

        let task = registry.get_task(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result, Some(json!({"url": "a.mp4"})));
        assert_eq!(task.progress, 100);
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let registry = registry();
        let id = registry.create_task(TaskKind::VideoGeneration, "3").await.unwrap();
        registry.start_task(&id).await.unwrap();
        registry.update_progress(&id, 40).await.unwrap();

        assert!(registry.start_task(&id).await.is_err());
        assert_eq!(registry.get_task(&id).await.unwrap().progress, 40);
    }

    #[tokio::test]
    async fn racing_finishers_have_one_winner() {
        let registry = registry();
        let id = registry.create_task(TaskKind::EpisodeFinalize, "8").await.unwrap();
        registry.start_task(&id).await.unwrap();

        let (a, b) = tokio::join!(
            registry.complete_task(&id, json!({"url": "final.mp4"})),
            registry.fail_task(&id, "boom"),
        );
        assert!(a.is_ok() ^ b.is_ok());
    }
}
