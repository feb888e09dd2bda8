//! Server configuration, loaded from environment variables at startup.

use std::time::Duration;

use drama_tasks::provider::{PollPolicy, ProviderConfig};
use drama_tasks::{RetentionPolicy, RunnerConfig, TaskKind, TaskTimeouts};
use strum::IntoEnumIterator;

/// Runtime configuration for drama-server.
///
/// Every field has a default so the server starts without any environment
/// variables set.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:5678"`).
    pub bind_address: String,

    /// sqlx SQLite URL (default: `"sqlite://drama.db"`).
    pub database_url: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Comma-separated allowed CORS origins; `None` allows any origin.
    pub cors_allowed_origins: Option<String>,

    pub enable_swagger: bool,

    /// Root directory for generated media.
    pub storage_dir: String,

    /// Public URL prefix under which a file server exposes `storage_dir`.
    pub base_url: String,

    pub ffmpeg_path: String,
    pub ffprobe_path: String,

    pub max_concurrent_jobs: usize,

    /// Terminal tasks older than this many days are pruned; `0` keeps them.
    pub task_retention_days: u64,
    pub retention_sweep_secs: u64,

    /// Per-kind deadlines from `DRAMA_TIMEOUT_<KIND>_SECS`; `0` disables.
    pub timeouts: TaskTimeouts,

    pub provider_name: String,
    pub provider_base_url: String,
    pub provider_api_key: Option<String>,
    pub provider_image_model: String,
    pub provider_video_model: String,
    pub provider_timeout_secs: u64,
    pub video_poll_secs: u64,
    pub video_poll_attempts: u32,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build [`Config`] from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let env_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_owned());
        let flag = |key: &str, default: bool| {
            lookup(key)
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(default)
        };

        let timeouts = TaskKind::iter().fold(TaskTimeouts::default(), |timeouts, kind| {
            let key = format!("DRAMA_TIMEOUT_{}_SECS", kind.as_ref().to_ascii_uppercase());
            match parse_with(&lookup, &key, TaskTimeouts::default_for(kind).as_secs()) {
                0 => timeouts.without(kind),
                secs => timeouts.with(kind, Duration::from_secs(secs)),
            }
        });

        Self {
            bind_address: env_or("DRAMA_BIND", "0.0.0.0:5678"),
            database_url: env_or("DRAMA_DATABASE_URL", "sqlite://drama.db"),
            log_level: env_or("DRAMA_LOG", "info"),
            log_json: flag("DRAMA_LOG_JSON", false),
            cors_allowed_origins: lookup("DRAMA_CORS_ORIGINS").filter(|v| !v.trim().is_empty()),
            enable_swagger: flag("DRAMA_ENABLE_SWAGGER", true),
            storage_dir: env_or("DRAMA_STORAGE_DIR", "./uploads"),
            base_url: env_or("DRAMA_BASE_URL", "http://localhost:5678/static"),
            ffmpeg_path: env_or("DRAMA_FFMPEG", "ffmpeg"),
            ffprobe_path: env_or("DRAMA_FFPROBE", "ffprobe"),
            max_concurrent_jobs: parse_with(&lookup, "DRAMA_MAX_CONCURRENT_JOBS", 4),
            task_retention_days: parse_with(&lookup, "DRAMA_TASK_RETENTION_DAYS", 30),
            retention_sweep_secs: parse_with(&lookup, "DRAMA_RETENTION_SWEEP_SECS", 3600),
            timeouts,
            provider_name: env_or("DRAMA_PROVIDER_NAME", "volcengine"),
            provider_base_url: env_or(
                "DRAMA_PROVIDER_BASE_URL",
                "https://ark.cn-beijing.volces.com/api/v3",
            ),
            provider_api_key: lookup("DRAMA_PROVIDER_API_KEY").filter(|v| !v.is_empty()),
            provider_image_model: env_or("DRAMA_PROVIDER_IMAGE_MODEL", "doubao-seedream-3-0-t2i-250415"),
            provider_video_model: env_or("DRAMA_PROVIDER_VIDEO_MODEL", "doubao-seedance-1-0-lite-i2v-250428"),
            provider_timeout_secs: parse_with(&lookup, "DRAMA_PROVIDER_TIMEOUT_SECS", 120),
            video_poll_secs: parse_with(&lookup, "DRAMA_VIDEO_POLL_SECS", 5),
            video_poll_attempts: parse_with(&lookup, "DRAMA_VIDEO_POLL_ATTEMPTS", 180),
        }
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            max_concurrent_jobs: self.max_concurrent_jobs,
            timeouts: self.timeouts.clone(),
        }
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy::from_days(
            self.task_retention_days,
            Duration::from_secs(self.retention_sweep_secs),
        )
    }

    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            name: self.provider_name.clone(),
            base_url: self.provider_base_url.clone(),
            api_key: self.provider_api_key.clone(),
            image_model: self.provider_image_model.clone(),
            video_model: self.provider_video_model.clone(),
            request_timeout: Duration::from_secs(self.provider_timeout_secs),
        }
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(self.video_poll_secs),
            max_attempts: self.video_poll_attempts,
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn parse_with<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
