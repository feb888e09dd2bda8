//! Background execution of task work.
//!
//! [`JobRunner::submit`] persists the task, points its record at it, and
//! hands the work closure to a tokio task, returning before any work runs.
//! The spawned job drives the task through `processing` to exactly one
//! terminal state and then runs the dependent-record updater.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use strum::IntoEnumIterator;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::error::{JobError, TaskError, UpdateError};
use crate::records::Binding;
use crate::registry::TaskRegistry;
use crate::store::{RecordStore, TaskStore};
use crate::task::{TaskKind, TaskRecord};
use crate::updater::RecordUpdater;

/// Error recorded on tasks a previous process left unfinished.
pub const INTERRUPTED_MESSAGE: &str = "interrupted by server restart";

/// Error recorded when the task's record does not exist.
pub const RESOURCE_NOT_FOUND_MESSAGE: &str = "resource not found";

/// Recorded when the store fails while binding; the detail goes to the log.
pub const INTERNAL_ERROR_MESSAGE: &str = "internal error";

/// Per-kind execution deadlines. A kind without an entry runs unbounded.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskTimeouts {
    limits: HashMap<TaskKind, Duration>,
}

impl TaskTimeouts {
    /// No deadlines at all.
    pub fn unbounded() -> Self {
        Self {
            limits: HashMap::new(),
        }
    }

    pub fn default_for(kind: TaskKind) -> Duration {
        let secs = match kind {
            TaskKind::ImageGeneration => 300,
            TaskKind::VideoGeneration => 900,
            TaskKind::VideoMerge => 600,
            TaskKind::EpisodeFinalize => 900,
        };
        Duration::from_secs(secs)
    }

    pub fn with(mut self, kind: TaskKind, limit: Duration) -> Self {
        self.limits.insert(kind, limit);
        self
    }

    pub fn without(mut self, kind: TaskKind) -> Self {
        self.limits.remove(&kind);
        self
    }

    pub fn for_kind(&self, kind: TaskKind) -> Option<Duration> {
        self.limits.get(&kind).copied()
    }
}

impl Default for TaskTimeouts {
    fn default() -> Self {
        Self {
            limits: TaskKind::iter()
                .map(|kind| (kind, Self::default_for(kind)))
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Jobs beyond this wait for a permit while their task stays `pending`.
    pub max_concurrent_jobs: usize,
    pub timeouts: TaskTimeouts,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            timeouts: TaskTimeouts::default(),
        }
    }
}

/// Tracks in-flight job abort handles, keyed by task ID.
#[derive(Default)]
pub struct TaskManager {
    handles: Mutex<HashMap<String, AbortHandle>>,
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TaskManager({} handles)", self.len())
    }
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `fut` and tracks it under `id` until it finishes or is aborted.
    pub fn spawn<F>(self: &Arc<Self>, id: String, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let tracked = Tracked {
            manager: Arc::clone(self),
            id: id.clone(),
        };
        // Hold the lock across spawn so the job cannot deregister before it
        // is registered.
        let mut handles = self.lock();
        let join = tokio::spawn(async move {
            let _tracked = tracked;
            fut.await
        });
        handles.insert(id, join.abort_handle());
        join
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Aborts every tracked job and returns how many there were.
    pub fn abort_all(&self) -> usize {
        let drained: Vec<AbortHandle> = self.lock().drain().map(|(_, h)| h).collect();
        for handle in &drained {
            handle.abort();
        }
        drained.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, AbortHandle>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes its job from the manager when the job future is dropped, whether
/// it ran to completion or was aborted.
struct Tracked {
    manager: Arc<TaskManager>,
    id: String,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.manager.lock().remove(&self.id);
    }
}

/// Aborts the inner job when the runner's own future is dropped.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// One progress report from a work closure.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub progress: u8,
    pub message: Option<String>,
}

/// Handed to a work closure so it can report progress. Reports are queued
/// and persisted by the runner; a closure never touches the store itself.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    task_id: Arc<str>,
    tx: mpsc::UnboundedSender<ProgressUpdate>,
}

impl ProgressReporter {
    pub fn channel(task_id: &str) -> (Self, mpsc::UnboundedReceiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                task_id: Arc::from(task_id),
                tx,
            },
            rx,
        )
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn report(&self, progress: u8, message: impl Into<String>) {
        self.send(ProgressUpdate {
            progress,
            message: Some(message.into()),
        });
    }

    pub fn set_progress(&self, progress: u8) {
        self.send(ProgressUpdate {
            progress,
            message: None,
        });
    }

    fn send(&self, update: ProgressUpdate) {
        // The receiver is gone once the job is finalized; late reports are moot.
        let _ = self.tx.send(update);
    }
}

/// How a job run ended, as seen by the runner.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed,
    Failed(String),
    /// The task was already terminal (or vanished) and the run did nothing.
    Abandoned,
}

pub struct JobRunner<S, R> {
    registry: TaskRegistry<S>,
    updater: RecordUpdater<R>,
    manager: Arc<TaskManager>,
    permits: Arc<Semaphore>,
    timeouts: Arc<TaskTimeouts>,
}

impl<S, R> Clone for JobRunner<S, R> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            updater: self.updater.clone(),
            manager: Arc::clone(&self.manager),
            permits: Arc::clone(&self.permits),
            timeouts: Arc::clone(&self.timeouts),
        }
    }
}

impl<S: TaskStore, R: RecordStore> JobRunner<S, R> {
    pub fn new(registry: TaskRegistry<S>, updater: RecordUpdater<R>, config: RunnerConfig) -> Self {
        Self {
            registry,
            updater,
            manager: Arc::new(TaskManager::new()),
            permits: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
            timeouts: Arc::new(config.timeouts),
        }
    }

    pub fn registry(&self) -> &TaskRegistry<S> {
        &self.registry
    }

    pub fn updater(&self) -> &RecordUpdater<R> {
        &self.updater
    }

    pub fn manager(&self) -> &Arc<TaskManager> {
        &self.manager
    }

    /// Creates a task for `resource_id`, binds its record, and starts `work`
    /// in the background. Returns the `pending` task without waiting.
    ///
    /// If the record does not exist the task is failed on the spot and
    /// [`TaskError::ResourceNotFound`] is returned.
    pub async fn submit<F, Fut>(
        &self,
        kind: TaskKind,
        resource_id: &str,
        input: Option<Value>,
        work: F,
    ) -> Result<TaskRecord, TaskError>
    where
        F: FnOnce(ProgressReporter) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, JobError>> + Send + 'static,
    {
        let task = self
            .registry
            .create_task_with_input(kind, resource_id, input)
            .await?;

        match self.updater.bind(&task).await {
            Ok(Binding::Bound) => {}
            Ok(Binding::Superseded) => {
                // Runs anyway; the updater skips its outcome.
                debug!(task_id = %task.id, %kind, resource_id, "record already tracks a newer task");
            }
            Err(UpdateError::Store(err)) => {
                error!(task_id = %task.id, %kind, error = %err, "failed to bind task to its record");
                self.registry
                    .fail_task(&task.id, INTERNAL_ERROR_MESSAGE)
                    .await?;
                return Err(err.into());
            }
            Ok(Binding::Missing) | Err(_) => {
                self.registry
                    .fail_task(&task.id, RESOURCE_NOT_FOUND_MESSAGE)
                    .await?;
                return Err(TaskError::ResourceNotFound {
                    kind,
                    resource_id: resource_id.to_owned(),
                });
            }
        }

        self.spawn(task.clone(), work);
        Ok(task)
    }

    /// Runs `work` for an existing task in the background.
    pub fn spawn<F, Fut>(&self, task: TaskRecord, work: F) -> JoinHandle<TaskOutcome>
    where
        F: FnOnce(ProgressReporter) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, JobError>> + Send + 'static,
    {
        let runner = self.clone();
        let id = task.id.clone();
        self.manager.spawn(id, async move { runner.run(task, work).await })
    }

    /// Drives one task to a terminal state. Never returns an error: every
    /// failure ends up on the task or in the log.
    ///
    /// Work that outlives its deadline is dropped before the task is failed.
    pub async fn run<F, Fut>(&self, task: TaskRecord, work: F) -> TaskOutcome
    where
        F: FnOnce(ProgressReporter) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, JobError>> + Send + 'static,
    {
        let task_id = task.id.clone();
        let _permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!(task_id = %task_id, "job queue closed; task not started");
                return TaskOutcome::Abandoned;
            }
        };

        if let Err(err) = self.registry.start_task(&task_id).await {
            warn!(task_id = %task_id, error = %err, "task could not be started; skipping");
            return TaskOutcome::Abandoned;
        }
        info!(task_id = %task_id, kind = %task.kind, resource_id = %task.resource_id, "job started");

        let (reporter, mut progress) = ProgressReporter::channel(&task_id);
        let limit = self.timeouts.for_kind(task.kind);
        let mut job = tokio::spawn(work(reporter));
        let _abort_job = AbortOnDrop(job.abort_handle());

        let deadline = async {
            match limit {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        let outcome = loop {
            tokio::select! {
                joined = &mut job => break match joined {
                    Ok(result) => result,
                    Err(err) if err.is_panic() => Err(JobError::Panicked),
                    Err(_) => Err(JobError::Aborted),
                },
                Some(update) = progress.recv() => self.record_progress(&task_id, update).await,
                () = &mut deadline => {
                    job.abort();
                    // Returns once the work future has been dropped.
                    let _ = (&mut job).await;
                    break Err(JobError::TimedOut(limit.unwrap_or_default()));
                }
            }
        };

        // Reports sent just before the job returned are still queued. Fold
        // them into one write.
        let mut queued: Option<ProgressUpdate> = None;
        while let Ok(update) = progress.try_recv() {
            queued = Some(match queued {
                Some(prev) => ProgressUpdate {
                    progress: update.progress.max(prev.progress),
                    message: update.message.or(prev.message),
                },
                None => update,
            });
        }
        if let Some(update) = queued {
            self.record_progress(&task_id, update).await;
        }

        match outcome {
            Ok(result) => self.finish_success(&task_id, result).await,
            Err(err) => self.finish_failure(&task_id, err).await,
        }
    }

    /// Fails every task a previous process left unfinished and runs the
    /// failure path on their records. Returns how many were recovered.
    pub async fn recover_interrupted(&self) -> Result<usize, TaskError> {
        let mut recovered = 0;
        for task in self.registry.unfinished_tasks().await? {
            match self.registry.fail_task(&task.id, INTERRUPTED_MESSAGE).await {
                Ok(failed) => {
                    recovered += 1;
                    if let Err(err) = self.updater.on_failure(&failed, INTERRUPTED_MESSAGE).await {
                        error!(task_id = %failed.id, error = %err, "dependent record update failed");
                    }
                }
                Err(err) => warn!(task_id = %task.id, error = %err, "could not fail interrupted task"),
            }
        }
        if recovered > 0 {
            info!(count = recovered, "failed tasks interrupted by restart");
        }
        Ok(recovered)
    }

    async fn record_progress(&self, task_id: &str, update: ProgressUpdate) {
        if let Err(err) = self
            .registry
            .report_progress(task_id, update.progress, update.message)
            .await
        {
            warn!(task_id, error = %err, "progress update rejected");
        }
    }

    async fn finish_success(&self, task_id: &str, result: Value) -> TaskOutcome {
        let task = match self.registry.complete_task(task_id, result).await {
            Ok(task) => task,
            Err(err) => {
                warn!(task_id, error = %err, "task completion rejected");
                return TaskOutcome::Abandoned;
            }
        };
        info!(task_id, kind = %task.kind, "job completed");

        let result = task.result.clone().unwrap_or(Value::Null);
        match self.updater.on_success(&task, &result).await {
            Ok(applied) => debug!(task_id, ?applied, "dependent record updated"),
            Err(err) => error!(task_id, kind = %task.kind, error = %err, "dependent record update failed"),
        }
        TaskOutcome::Completed
    }

    async fn finish_failure(&self, task_id: &str, err: JobError) -> TaskOutcome {
        let message = err.to_string();
        let task = match self.registry.fail_task(task_id, message.clone()).await {
            Ok(task) => task,
            Err(err) => {
                warn!(task_id, error = %err, "task failure rejected");
                return TaskOutcome::Abandoned;
            }
        };
        warn!(task_id, kind = %task.kind, error = %message, "job failed");

        match self.updater.on_failure(&task, &message).await {
            Ok(applied) => debug!(task_id, ?applied, "dependent record updated"),
            Err(err) => error!(task_id, kind = %task.kind, error = %err, "dependent record update failed"),
        }
        TaskOutcome::Failed(message)
    }
}
