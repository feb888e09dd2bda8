//! Asynchronous task tracking for the drama generation backend.
//!
//! Long-running operations (image generation, video generation, video
//! merging, episode finalization) are tracked as [`TaskRecord`]s that move
//! through `pending -> processing -> completed | failed`.
//!
//! - [`TaskRegistry`] owns task bookkeeping and the guarded transitions.
//! - [`JobRunner`] executes a work closure off the request path and drives
//!   the registry through its state machine.
//! - [`RecordUpdater`] applies a task's terminal outcome to the business
//!   record that requested the work.
//!
//! Storage is injected through the [`store::TaskStore`] and
//! [`store::RecordStore`] traits. [`store::SqliteStore`] backs the server,
//! [`store::MemoryStore`] backs tests.

pub mod error;
pub mod ffmpeg;
pub mod provider;
pub mod records;
pub mod registry;
pub mod retention;
pub mod runner;
pub mod store;
pub mod task;
pub mod updater;

pub use error::{JobError, StoreError, TaskError, UpdateError};
pub use records::{Binding, RecordChange, ResourceRef};
pub use registry::TaskRegistry;
pub use retention::RetentionPolicy;
pub use runner::{
    JobRunner, ProgressReporter, ProgressUpdate, RunnerConfig, TaskManager, TaskOutcome, TaskTimeouts,
};
pub use task::{TaskKind, TaskPage, TaskQuery, TaskRecord, TaskStatus};
pub use updater::{Applied, RecordUpdater};
