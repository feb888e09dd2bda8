//! In-memory implementation of [`TaskStore`] and [`RecordStore`].
//!
//! Everything lives behind one mutex, so each trait call is atomic. Intended
//! for tests and embedding; nothing survives a restart.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::{RecordStore, TaskStore};
use crate::error::StoreError;
use crate::records::{
    Binding, Episode, EpisodeStatus, Generation, JobStatus, MediaKind, NewEpisode, NewGeneration,
    NewVideoMerge, RecordChange, ResourceRef, VideoMerge,
};
use crate::task::{TaskPage, TaskQuery, TaskRecord, TaskStatus};

#[derive(Debug, Default)]
struct Inner {
    /// task id -> (insertion sequence, record)
    tasks: HashMap<String, (u64, TaskRecord)>,
    next_seq: u64,
    episodes: BTreeMap<i64, Episode>,
    merges: BTreeMap<i64, VideoMerge>,
    generations: BTreeMap<i64, Generation>,
    /// Creation time of the task each record currently tracks.
    bound_at: HashMap<ResourceRef, DateTime<Utc>>,
    next_record_id: i64,
}

impl Inner {
    fn allocate_id(&mut self) -> i64 {
        self.next_record_id += 1;
        self.next_record_id
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl TaskStore for MemoryStore {
    async fn insert_task(&self, record: &TaskRecord) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.next_seq += 1;
        let seq = inner.next_seq;
        inner.tasks.insert(record.id.clone(), (seq, record.clone()));
        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.lock()?.tasks.get(id).map(|(_, r)| r.clone()))
    }

    async fn query_tasks(&self, query: &TaskQuery) -> Result<TaskPage, StoreError> {
        let inner = self.lock()?;
        let mut matching: Vec<&(u64, TaskRecord)> = inner
            .tasks
            .values()
            .filter(|(_, task)| query.matches(task))
            .collect();
        matching.sort_by(|(seq_a, a), (seq_b, b)| {
            b.created_at.cmp(&a.created_at).then(seq_b.cmp(seq_a))
        });

        let total = matching.len() as u64;
        let offset = usize::try_from(query.offset).unwrap_or(usize::MAX);
        let limit = query
            .limit
            .map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
        let items = matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(_, task)| task.clone())
            .collect();
        Ok(TaskPage { total, items })
    }

    async fn update_task_if_status(
        &self,
        record: &TaskRecord,
        expected: TaskStatus,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        match inner.tasks.get_mut(&record.id) {
            Some((_, stored)) if stored.status == expected => {
                *stored = record.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn unfinished_tasks(&self) -> Result<Vec<TaskRecord>, StoreError> {
        let inner = self.lock()?;
        let mut tasks: Vec<&(u64, TaskRecord)> = inner
            .tasks
            .values()
            .filter(|(_, task)| !task.is_terminal())
            .collect();
        tasks.sort_by_key(|(seq, _)| *seq);
        Ok(tasks.into_iter().map(|(_, task)| task.clone()).collect())
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut inner = self.lock()?;
        let before = inner.tasks.len();
        inner.tasks.retain(|_, (_, task)| {
            !(task.is_terminal() && task.completed_at.is_some_and(|at| at < cutoff))
        });
        Ok((before - inner.tasks.len()) as u64)
    }
}

impl RecordStore for MemoryStore {
    async fn insert_episode(&self, episode: NewEpisode) -> Result<Episode, StoreError> {
        let mut inner = self.lock()?;
        let id = inner.allocate_id();
        let record = Episode {
            id,
            drama_id: episode.drama_id,
            episode_number: episode.episode_number,
            title: episode.title,
            status: EpisodeStatus::Draft,
            video_url: None,
            duration: None,
            error_msg: None,
            task_id: None,
            created_at: Utc::now(),
        };
        inner.episodes.insert(id, record.clone());
        Ok(record)
    }

    async fn get_episode(&self, id: i64) -> Result<Option<Episode>, StoreError> {
        Ok(self.lock()?.episodes.get(&id).cloned())
    }

    async fn episode_clips(&self, episode_id: i64) -> Result<Vec<String>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .generations
            .values()
            .filter(|g| {
                g.media == MediaKind::Video
                    && g.episode_id == Some(episode_id)
                    && g.status == JobStatus::Completed
            })
            .filter_map(|g| g.url.clone())
            .collect())
    }

    async fn insert_video_merge(&self, merge: NewVideoMerge) -> Result<VideoMerge, StoreError> {
        let mut inner = self.lock()?;
        let id = inner.allocate_id();
        let record = VideoMerge {
            id,
            episode_id: merge.episode_id,
            drama_id: merge.drama_id,
            title: merge.title,
            status: JobStatus::Pending,
            clips: merge.clips,
            merged_url: None,
            duration: None,
            task_id: None,
            error_msg: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        inner.merges.insert(id, record.clone());
        Ok(record)
    }

    async fn get_video_merge(&self, id: i64) -> Result<Option<VideoMerge>, StoreError> {
        Ok(self.lock()?.merges.get(&id).cloned())
    }

    async fn insert_generation(&self, generation: NewGeneration) -> Result<Generation, StoreError> {
        let mut inner = self.lock()?;
        let id = inner.allocate_id();
        let record = Generation {
            id,
            media: generation.media,
            drama_id: generation.drama_id,
            episode_id: generation.episode_id,
            provider: generation.provider,
            prompt: generation.prompt,
            status: JobStatus::Pending,
            url: None,
            task_id: None,
            error_msg: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        inner.generations.insert(id, record.clone());
        Ok(record)
    }

    async fn get_generation(&self, id: i64) -> Result<Option<Generation>, StoreError> {
        Ok(self.lock()?.generations.get(&id).cloned())
    }

    async fn bind_task(
        &self,
        resource: ResourceRef,
        task_id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Binding, StoreError> {
        let mut inner = self.lock()?;
        let exists = match resource {
            ResourceRef::Episode(id) => inner.episodes.contains_key(&id),
            ResourceRef::VideoMerge(id) => inner.merges.contains_key(&id),
            ResourceRef::Generation(id) => inner.generations.contains_key(&id),
        };
        if !exists {
            return Ok(Binding::Missing);
        }
        if inner.bound_at.get(&resource).is_some_and(|bound| *bound > created_at) {
            return Ok(Binding::Superseded);
        }
        inner.bound_at.insert(resource, created_at);

        let task_id = Some(task_id.to_owned());
        match resource {
            ResourceRef::Episode(id) => {
                if let Some(ep) = inner.episodes.get_mut(&id) {
                    ep.task_id = task_id;
                    ep.status = EpisodeStatus::Processing;
                    ep.error_msg = None;
                }
            }
            ResourceRef::VideoMerge(id) => {
                if let Some(m) = inner.merges.get_mut(&id) {
                    m.task_id = task_id;
                    m.status = JobStatus::Processing;
                    m.error_msg = None;
                    m.completed_at = None;
                }
            }
            ResourceRef::Generation(id) => {
                if let Some(g) = inner.generations.get_mut(&id) {
                    g.task_id = task_id;
                    g.status = JobStatus::Processing;
                    g.error_msg = None;
                    g.completed_at = None;
                }
            }
        }
        Ok(Binding::Bound)
    }

    async fn apply_change(
        &self,
        id: i64,
        task_id: &str,
        change: &RecordChange,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let owns = |current: &Option<String>| current.as_deref() == Some(task_id);
        let now = Utc::now();

        match change {
            RecordChange::EpisodeFinalized { video_url, duration } => {
                match inner.episodes.get_mut(&id).filter(|ep| owns(&ep.task_id)) {
                    Some(ep) => {
                        ep.video_url = Some(video_url.clone());
                        ep.duration = *duration;
                        ep.status = EpisodeStatus::Completed;
                        ep.error_msg = None;
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            RecordChange::EpisodeReverted { error } => {
                match inner.episodes.get_mut(&id).filter(|ep| owns(&ep.task_id)) {
                    Some(ep) => {
                        ep.status = EpisodeStatus::Draft;
                        ep.error_msg = Some(error.clone());
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            RecordChange::MergeCompleted { merged_url, duration } => {
                match inner.merges.get_mut(&id).filter(|m| owns(&m.task_id)) {
                    Some(m) => {
                        m.merged_url = Some(merged_url.clone());
                        m.duration = *duration;
                        m.status = JobStatus::Completed;
                        m.error_msg = None;
                        m.completed_at.get_or_insert(now);
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            RecordChange::MergeFailed { error } => {
                match inner.merges.get_mut(&id).filter(|m| owns(&m.task_id)) {
                    Some(m) => {
                        m.status = JobStatus::Failed;
                        m.error_msg = Some(error.clone());
                        m.completed_at.get_or_insert(now);
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            RecordChange::GenerationCompleted { url } => {
                match inner.generations.get_mut(&id).filter(|g| owns(&g.task_id)) {
                    Some(g) => {
                        g.url = Some(url.clone());
                        g.status = JobStatus::Completed;
                        g.error_msg = None;
                        g.completed_at.get_or_insert(now);
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            RecordChange::GenerationFailed { error } => {
                match inner.generations.get_mut(&id).filter(|g| owns(&g.task_id)) {
                    Some(g) => {
                        g.status = JobStatus::Failed;
                        g.error_msg = Some(error.clone());
                        g.completed_at.get_or_insert(now);
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskKind;

    #[tokio::test]
    async fn conditional_update_rejects_stale_status() {
        let store = MemoryStore::new();
        let mut task = TaskRecord::new(TaskKind::VideoMerge, "1", None);
        store.insert_task(&task).await.unwrap();

        task.status = TaskStatus::Processing;
        assert!(store
            .update_task_if_status(&task, TaskStatus::Pending)
            .await
            .unwrap());
        // Stored status is now `processing`, so a second pending-based write loses.
        task.status = TaskStatus::Failed;
        assert!(!store
            .update_task_if_status(&task, TaskStatus::Pending)
            .await
            .unwrap());
        assert_eq!(
            store.get_task(&task.id).await.unwrap().unwrap().status,
            TaskStatus::Processing
        );
    }

    #[tokio::test]
    async fn apply_change_requires_matching_task() {
        let store = MemoryStore::new();
        let ep = store
            .insert_episode(NewEpisode {
                drama_id: 1,
                episode_number: 1,
                title: "Pilot".into(),
            })
            .await
            .unwrap();
        assert_eq!(
            store
                .bind_task(ResourceRef::Episode(ep.id), "task-b", Utc::now())
                .await
                .unwrap(),
            Binding::Bound
        );

        let change = RecordChange::EpisodeFinalized {
            video_url: "a.mp4".into(),
            duration: Some(3.0),
        };
        assert!(!store.apply_change(ep.id, "task-a", &change).await.unwrap());
        assert!(store.apply_change(ep.id, "task-b", &change).await.unwrap());

        let stored = store.get_episode(ep.id).await.unwrap().unwrap();
        assert_eq!(stored.status, EpisodeStatus::Completed);
        assert_eq!(stored.video_url.as_deref(), Some("a.mp4"));
    }

    #[tokio::test]
    async fn bind_missing_record_is_reported() {
        let store = MemoryStore::new();
        assert_eq!(
            store
                .bind_task(ResourceRef::VideoMerge(99), "t", Utc::now())
                .await
                .unwrap(),
            Binding::Missing
        );
    }

    #[tokio::test]
    async fn older_task_cannot_rebind() {
        let store = MemoryStore::new();
        let ep = store
            .insert_episode(NewEpisode {
                drama_id: 1,
                episode_number: 2,
                title: "Storm".into(),
            })
            .await
            .unwrap();
        let older = Utc::now();
        let newer = older + chrono::Duration::milliseconds(2);
        let resource = ResourceRef::Episode(ep.id);

        assert_eq!(store.bind_task(resource, "b", newer).await.unwrap(), Binding::Bound);
        assert_eq!(store.bind_task(resource, "a", older).await.unwrap(), Binding::Superseded);
        let stored = store.get_episode(ep.id).await.unwrap().unwrap();
        assert_eq!(stored.task_id.as_deref(), Some("b"));
    }
}
