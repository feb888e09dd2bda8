//! Storage abstraction layer.
//!
//! [`TaskStore`] persists task records; [`RecordStore`] persists the business
//! records that tasks act upon. [`SqliteStore`] implements both for the
//! server, [`MemoryStore`] implements both for tests. To swap to another
//! database, implement the traits for the new type and change the concrete
//! type where the runner is built.
//!
//! All trait methods use `impl Future` in their signatures so no extra
//! `async-trait` crate is required.

pub mod memory;
pub mod sqlite;

use std::future::Future;

use chrono::{DateTime, Utc};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::StoreError;
use crate::records::{
    Binding, Episode, Generation, NewEpisode, NewGeneration, NewVideoMerge, RecordChange, ResourceRef,
    VideoMerge,
};
use crate::task::{TaskPage, TaskQuery, TaskRecord, TaskStatus};

pub trait TaskStore: Send + Sync + 'static {
    fn insert_task(
        &self,
        record: &TaskRecord,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn get_task(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<TaskRecord>, StoreError>> + Send;

    /// Matching tasks, newest first, with the total count before paging.
    fn query_tasks(
        &self,
        query: &TaskQuery,
    ) -> impl Future<Output = Result<TaskPage, StoreError>> + Send;

    /// Overwrites the stored row with `record` only while its status is
    /// still `expected`. Returns `false` when the row is missing or its
    /// status moved on.
    fn update_task_if_status(
        &self,
        record: &TaskRecord,
        expected: TaskStatus,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Tasks left `pending` or `processing`, oldest first.
    fn unfinished_tasks(&self) -> impl Future<Output = Result<Vec<TaskRecord>, StoreError>> + Send;

    /// Deletes terminal tasks completed before `cutoff`.
    fn delete_terminal_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;
}

pub trait RecordStore: Send + Sync + 'static {
    fn insert_episode(
        &self,
        episode: NewEpisode,
    ) -> impl Future<Output = Result<Episode, StoreError>> + Send;

    fn get_episode(
        &self,
        id: i64,
    ) -> impl Future<Output = Result<Option<Episode>, StoreError>> + Send;

    /// URLs of the episode's completed video generations, in creation order.
    fn episode_clips(
        &self,
        episode_id: i64,
    ) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    fn insert_video_merge(
        &self,
        merge: NewVideoMerge,
    ) -> impl Future<Output = Result<VideoMerge, StoreError>> + Send;

    fn get_video_merge(
        &self,
        id: i64,
    ) -> impl Future<Output = Result<Option<VideoMerge>, StoreError>> + Send;

    fn insert_generation(
        &self,
        generation: NewGeneration,
    ) -> impl Future<Output = Result<Generation, StoreError>> + Send;

    fn get_generation(
        &self,
        id: i64,
    ) -> impl Future<Output = Result<Option<Generation>, StoreError>> + Send;

    /// Points the record at `task_id` and moves it to its in-progress status,
    /// unless the record already tracks a task created after `created_at`.
    /// Ties go to the later call.
    fn bind_task(
        &self,
        resource: ResourceRef,
        task_id: &str,
        created_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<Binding, StoreError>> + Send;

    /// Applies `change` to record `id` only while its `task_id` still equals
    /// `task_id`. Returns `false` when the record moved on to another task.
    fn apply_change(
        &self,
        id: i64,
        task_id: &str,
        change: &RecordChange,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;
}
