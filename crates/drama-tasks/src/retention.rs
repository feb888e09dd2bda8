//! Periodic pruning of old terminal tasks.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::TaskError;
use crate::registry::TaskRegistry;
use crate::store::TaskStore;

#[derive(Debug, Clone, PartialEq)]
pub struct RetentionPolicy {
    /// Terminal tasks completed longer ago than this are deleted. `None`
    /// keeps everything.
    pub max_age: Option<Duration>,
    pub sweep_interval: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age: Some(Duration::from_secs(30 * 24 * 60 * 60)),
            sweep_interval: Duration::from_secs(60 * 60),
        }
    }
}

impl RetentionPolicy {
    /// Builds a policy from whole days; `0` disables pruning.
    pub fn from_days(days: u64, sweep_interval: Duration) -> Self {
        Self {
            max_age: (days > 0).then(|| Duration::from_secs(days * 24 * 60 * 60)),
            sweep_interval,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_age.is_some() && !self.sweep_interval.is_zero()
    }

    /// Completion time before which tasks are pruned, relative to `now`.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let max_age = chrono::Duration::from_std(self.max_age?).ok()?;
        now.checked_sub_signed(max_age)
    }

    /// Runs one pruning pass. Returns the number of deleted tasks.
    pub async fn sweep_once<S: TaskStore>(&self, registry: &TaskRegistry<S>) -> Result<u64, TaskError> {
        let Some(cutoff) = self.cutoff(Utc::now()) else {
            return Ok(0);
        };
        let deleted = registry.prune_before(cutoff).await?;
        if deleted > 0 {
            info!(deleted, cutoff = %cutoff, "pruned old tasks");
        } else {
            debug!(cutoff = %cutoff, "no tasks to prune");
        }
        Ok(deleted)
    }

    /// Spawns the background sweeper. Returns `None` when pruning is disabled.
    pub fn spawn_sweeper<S: TaskStore>(self, registry: TaskRegistry<S>) -> Option<JoinHandle<()>> {
        if !self.is_enabled() {
            info!("task retention disabled");
            return None;
        }
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = self.sweep_once(&registry).await {
                    warn!(error = %err, "task retention sweep failed");
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::MemoryStore;
    use crate::task::TaskKind;
    use serde_json::json;

    #[test]
    fn zero_days_disables() {
        let policy = RetentionPolicy::from_days(0, Duration::from_secs(60));
        assert!(!policy.is_enabled());
        assert_eq!(policy.cutoff(Utc::now()), None);
    }

    #[test]
    fn cutoff_is_now_minus_age() {
        let policy = RetentionPolicy::from_days(30, Duration::from_secs(60));
        let now = Utc::now();
        assert_eq!(policy.cutoff(now), Some(now - chrono::Duration::days(30)));
    }

    #[tokio::test]
    async fn sweep_keeps_recent_and_unfinished_tasks() {
        let registry = TaskRegistry::new(Arc::new(MemoryStore::new()));
        let done = registry.create_task(TaskKind::ImageGeneration, "1").await.unwrap();
        registry.complete_task(&done, json!({"url": "x.png"})).await.unwrap();
        let pending = registry.create_task(TaskKind::ImageGeneration, "1").await.unwrap();

        // A zero-length retention window prunes everything already terminal.
        let policy = RetentionPolicy {
            max_age: Some(Duration::ZERO),
            sweep_interval: Duration::from_secs(60),
        };
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(policy.sweep_once(&registry).await.unwrap(), 1);
        assert!(registry.get_task(&done).await.is_err());
        assert!(registry.get_task(&pending).await.is_ok());

        let keep_all = RetentionPolicy::default();
        assert_eq!(keep_all.sweep_once(&registry).await.unwrap(), 0);
    }
}
