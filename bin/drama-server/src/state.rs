//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use drama_tasks::ffmpeg::FfmpegMerger;
use drama_tasks::provider::{MediaProvider, PollPolicy};
use drama_tasks::store::SqliteStore;
use drama_tasks::{JobRunner, RecordUpdater, TaskRegistry};

use crate::config::Config;

pub type Runner = JobRunner<SqliteStore, SqliteStore>;

/// State shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Task and record store.
    pub store: Arc<SqliteStore>,
    /// Background job runner; also owns the in-flight job handles.
    pub runner: Runner,
    pub merger: Arc<FfmpegMerger>,
    pub provider: Arc<dyn MediaProvider>,
    pub poll: PollPolicy,
}

impl AppState {
    /// Wires the runner and merger over `store` from `config`.
    pub fn new(config: Config, store: SqliteStore, provider: Arc<dyn MediaProvider>) -> Self {
        let store = Arc::new(store);
        let runner = JobRunner::new(
            TaskRegistry::new(Arc::clone(&store)),
            RecordUpdater::new(Arc::clone(&store)),
            config.runner_config(),
        );
        let merger = FfmpegMerger::new(&config.storage_dir, config.base_url.clone())
            .with_binaries(&config.ffmpeg_path, &config.ffprobe_path);
        Self {
            poll: config.poll_policy(),
            config: Arc::new(config),
            store,
            runner,
            merger: Arc::new(merger),
            provider,
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("jobs", self.runner.manager())
            .field("provider", &self.provider.name())
            .finish()
    }
}
