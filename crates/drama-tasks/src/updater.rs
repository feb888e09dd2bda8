//! Propagates a task's terminal outcome to the record that requested it.
//!
//! The strategy per [`TaskKind`] is an exhaustive match, so adding a kind
//! without deciding how it updates its record does not compile.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::UpdateError;
use crate::records::{Binding, RecordChange, ResourceRef};
use crate::store::RecordStore;
use crate::task::{TaskKind, TaskRecord};

/// What happened to the dependent record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Updated,
    /// The record now tracks a newer task; nothing was written.
    Superseded,
}

pub struct RecordUpdater<R> {
    records: Arc<R>,
}

impl<R> Clone for RecordUpdater<R> {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
        }
    }
}

impl<R: RecordStore> RecordUpdater<R> {
    pub fn new(records: Arc<R>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &Arc<R> {
        &self.records
    }

    /// Makes `task` the one its record tracks and moves the record to its
    /// in-progress status, unless a task created later already holds it.
    pub async fn bind(&self, task: &TaskRecord) -> Result<Binding, UpdateError> {
        let resource = ResourceRef::for_task(task)?;
        Ok(self
            .records
            .bind_task(resource, &task.id, task.created_at)
            .await?)
    }

    pub async fn on_success(&self, task: &TaskRecord, result: &Value) -> Result<Applied, UpdateError> {
        let url = || {
            result
                .get("url")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .ok_or(UpdateError::MissingField {
                    kind: task.kind,
                    field: "url",
                })
        };
        let duration = result.get("duration").and_then(Value::as_f64);

        let change = match task.kind {
            TaskKind::EpisodeFinalize => RecordChange::EpisodeFinalized {
                video_url: url()?,
                duration,
            },
            TaskKind::VideoMerge => RecordChange::MergeCompleted {
                merged_url: url()?,
                duration,
            },
            TaskKind::ImageGeneration | TaskKind::VideoGeneration => {
                RecordChange::GenerationCompleted { url: url()? }
            }
        };
        self.apply(task, change).await
    }

    pub async fn on_failure(&self, task: &TaskRecord, error: &str) -> Result<Applied, UpdateError> {
        let error = error.to_owned();
        let change = match task.kind {
            TaskKind::EpisodeFinalize => RecordChange::EpisodeReverted { error },
            TaskKind::VideoMerge => RecordChange::MergeFailed { error },
            TaskKind::ImageGeneration | TaskKind::VideoGeneration => {
                RecordChange::GenerationFailed { error }
            }
        };
        self.apply(task, change).await
    }

    async fn apply(&self, task: &TaskRecord, change: RecordChange) -> Result<Applied, UpdateError> {
        let resource = ResourceRef::for_task(task)?;
        if self
            .records
            .apply_change(resource.id(), &task.id, &change)
            .await?
        {
            Ok(Applied::Updated)
        } else {
            debug!(
                task_id = %task.id,
                kind = %task.kind,
                resource_id = %task.resource_id,
                "record no longer tracks this task; outcome skipped"
            );
            Ok(Applied::Superseded)
        }
    }
}
