//! SQLite implementation of [`TaskStore`] and [`RecordStore`].
//!
//! Migrations are embedded at compile time from `./migrations` and run by
//! [`SqliteStore::connect`]. Queries use the runtime-checked `sqlx::query`
//! form so no `DATABASE_URL` is needed to build.
//!
//! Timestamps are stored as RFC 3339 text with microsecond precision and a
//! `Z` suffix, which keeps lexical order equal to chronological order.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::{RecordStore, TaskStore};
use crate::error::StoreError;
use crate::records::{
    Binding, Episode, EpisodeStatus, Generation, JobStatus, NewEpisode, NewGeneration, NewVideoMerge,
    RecordChange, ResourceRef, VideoMerge,
};
use crate::task::{TaskPage, TaskQuery, TaskRecord, TaskStatus};

const TASK_COLUMNS: &str = "id, kind, status, progress, message, resource_id, input_data, \
     result_data, error_msg, created_at, updated_at, started_at, completed_at";

type TaskRow = (
    String,
    String,
    String,
    i64,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    String,
    Option<String>,
    Option<String>,
);

type EpisodeRow = (
    i64,
    i64,
    i64,
    String,
    String,
    Option<String>,
    Option<f64>,
    Option<String>,
    Option<String>,
    String,
);

type MergeRow = (
    i64,
    i64,
    i64,
    Option<String>,
    String,
    String,
    Option<String>,
    Option<f64>,
    Option<String>,
    Option<String>,
    String,
    Option<String>,
);

type GenerationRow = (
    i64,
    String,
    i64,
    Option<i64>,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    Option<String>,
);

/// SQLite-backed task and record store.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `url` and run pending migrations.
    ///
    /// `url` is a sqlx SQLite URL such as `"sqlite://drama.db"`. In-memory
    /// URLs (`"sqlite::memory:"`) are pinned to a single connection that is
    /// never recycled, otherwise every pooled connection would see its own
    /// empty database.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new()
        };
        let pool = pool_options.connect_with(options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(column: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    raw.parse()
        .map_err(|e: chrono::ParseError| StoreError::Corrupt(format!("bad {column} '{raw}': {e}")))
}

fn parse_opt_ts(column: &str, raw: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.map(|raw| parse_ts(column, &raw)).transpose()
}

fn parse_enum<T: FromStr>(column: &str, raw: &str) -> Result<T, StoreError> {
    raw.parse()
        .map_err(|_| StoreError::Corrupt(format!("unknown {column} '{raw}'")))
}

fn to_json(value: Option<&serde_json::Value>) -> Result<Option<String>, StoreError> {
    Ok(value.map(serde_json::to_string).transpose()?)
}

fn from_json(raw: Option<String>) -> Result<Option<serde_json::Value>, StoreError> {
    Ok(raw.as_deref().map(serde_json::from_str).transpose()?)
}

fn task_from_row(row: TaskRow) -> Result<TaskRecord, StoreError> {
    let (
        id,
        kind,
        status,
        progress,
        message,
        resource_id,
        input_data,
        result_data,
        error_msg,
        created_at,
        updated_at,
        started_at,
        completed_at,
    ) = row;
    Ok(TaskRecord {
        kind: parse_enum("kind", &kind)?,
        status: parse_enum("status", &status)?,
        progress: progress.clamp(0, 100) as u8,
        message,
        resource_id,
        input: from_json(input_data)?,
        result: from_json(result_data)?,
        error: error_msg,
        created_at: parse_ts("created_at", &created_at)?,
        updated_at: parse_ts("updated_at", &updated_at)?,
        started_at: parse_opt_ts("started_at", started_at)?,
        completed_at: parse_opt_ts("completed_at", completed_at)?,
        id,
    })
}

fn episode_from_row(row: EpisodeRow) -> Result<Episode, StoreError> {
    let (id, drama_id, episode_number, title, status, video_url, duration, error_msg, task_id, created_at) =
        row;
    Ok(Episode {
        id,
        drama_id,
        episode_number,
        title,
        status: parse_enum("episode status", &status)?,
        video_url,
        duration,
        error_msg,
        task_id,
        created_at: parse_ts("created_at", &created_at)?,
    })
}

fn merge_from_row(row: MergeRow) -> Result<VideoMerge, StoreError> {
    let (
        id,
        episode_id,
        drama_id,
        title,
        status,
        clips,
        merged_url,
        duration,
        task_id,
        error_msg,
        created_at,
        completed_at,
    ) = row;
    Ok(VideoMerge {
        id,
        episode_id,
        drama_id,
        title,
        status: parse_enum("merge status", &status)?,
        clips: serde_json::from_str(&clips)?,
        merged_url,
        duration,
        task_id,
        error_msg,
        created_at: parse_ts("created_at", &created_at)?,
        completed_at: parse_opt_ts("completed_at", completed_at)?,
    })
}

fn generation_from_row(row: GenerationRow) -> Result<Generation, StoreError> {
    let (
        id,
        media,
        drama_id,
        episode_id,
        provider,
        prompt,
        status,
        url,
        task_id,
        error_msg,
        created_at,
        completed_at,
    ) = row;
    Ok(Generation {
        id,
        media: parse_enum("media", &media)?,
        drama_id,
        episode_id,
        provider,
        prompt,
        status: parse_enum("generation status", &status)?,
        url,
        task_id,
        error_msg,
        created_at: parse_ts("created_at", &created_at)?,
        completed_at: parse_opt_ts("completed_at", completed_at)?,
    })
}

fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, query: &TaskQuery) {
    builder.push(" WHERE 1 = 1");
    if let Some(resource_id) = &query.resource_id {
        builder.push(" AND resource_id = ").push_bind(resource_id.clone());
    }
    if let Some(kind) = query.kind {
        builder.push(" AND kind = ").push_bind(kind.as_ref().to_owned());
    }
    if let Some(status) = query.status {
        builder.push(" AND status = ").push_bind(status.as_ref().to_owned());
    }
}

// ── TaskStore ─────────────────────────────────────────────────────────────────

impl TaskStore for SqliteStore {
    async fn insert_task(&self, record: &TaskRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO tasks (id, kind, status, progress, message, resource_id, input_data, \
             result_data, error_msg, created_at, updated_at, started_at, completed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )
        .bind(&record.id)
        .bind(record.kind.as_ref())
        .bind(record.status.as_ref())
        .bind(i64::from(record.progress))
        .bind(&record.message)
        .bind(&record.resource_id)
        .bind(to_json(record.input.as_ref())?)
        .bind(to_json(record.result.as_ref())?)
        .bind(&record.error)
        .bind(ts(record.created_at))
        .bind(ts(record.updated_at))
        .bind(record.started_at.map(ts))
        .bind(record.completed_at.map(ts))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<Option<TaskRecord>, StoreError> {
        let row: Option<TaskRow> =
            sqlx::query_as(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(task_from_row).transpose()
    }

    async fn query_tasks(&self, query: &TaskQuery) -> Result<TaskPage, StoreError> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM tasks");
        push_filters(&mut count, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Sqlite>::new(format!("SELECT {TASK_COLUMNS} FROM tasks"));
        push_filters(&mut select, query);
        // LIMIT -1 means "no limit" in SQLite.
        let limit = query
            .limit
            .and_then(|l| i64::try_from(l).ok())
            .unwrap_or(-1);
        let offset = i64::try_from(query.offset).unwrap_or(i64::MAX);
        select
            .push(" ORDER BY created_at DESC, rowid DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);
        let rows: Vec<TaskRow> = select.build_query_as().fetch_all(&self.pool).await?;

        Ok(TaskPage {
            total: u64::try_from(total).unwrap_or(0),
            items: rows
                .into_iter()
                .map(task_from_row)
                .collect::<Result<_, _>>()?,
        })
    }

    async fn update_task_if_status(
        &self,
        record: &TaskRecord,
        expected: TaskStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE tasks SET status = ?1, progress = ?2, message = ?3, result_data = ?4, \
             error_msg = ?5, updated_at = ?6, started_at = ?7, completed_at = ?8 \
             WHERE id = ?9 AND status = ?10",
        )
        .bind(record.status.as_ref())
        .bind(i64::from(record.progress))
        .bind(&record.message)
        .bind(to_json(record.result.as_ref())?)
        .bind(&record.error)
        .bind(ts(record.updated_at))
        .bind(record.started_at.map(ts))
        .bind(record.completed_at.map(ts))
        .bind(&record.id)
        .bind(expected.as_ref())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn unfinished_tasks(&self) -> Result<Vec<TaskRecord>, StoreError> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE status IN ('pending', 'processing') \
             ORDER BY created_at ASC, rowid ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(task_from_row).collect()
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM tasks WHERE status IN ('completed', 'failed') \
             AND completed_at IS NOT NULL AND completed_at < ?1",
        )
        .bind(ts(cutoff))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

// ── RecordStore ───────────────────────────────────────────────────────────────

impl RecordStore for SqliteStore {
    async fn insert_episode(&self, episode: NewEpisode) -> Result<Episode, StoreError> {
        let created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO episodes (drama_id, episode_number, title, status, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(episode.drama_id)
        .bind(episode.episode_number)
        .bind(&episode.title)
        .bind(EpisodeStatus::Draft.as_ref())
        .bind(ts(created_at))
        .execute(&self.pool)
        .await?;
        Ok(Episode {
            id: result.last_insert_rowid(),
            drama_id: episode.drama_id,
            episode_number: episode.episode_number,
            title: episode.title,
            status: EpisodeStatus::Draft,
            video_url: None,
            duration: None,
            error_msg: None,
            task_id: None,
            created_at,
        })
    }

    async fn get_episode(&self, id: i64) -> Result<Option<Episode>, StoreError> {
        let row: Option<EpisodeRow> = sqlx::query_as(
            "SELECT id, drama_id, episode_number, title, status, video_url, duration, error_msg, \
             task_id, created_at FROM episodes WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(episode_from_row).transpose()
    }

    async fn episode_clips(&self, episode_id: i64) -> Result<Vec<String>, StoreError> {
        let urls: Vec<String> = sqlx::query_scalar(
            "SELECT url FROM generations WHERE episode_id = ?1 AND media = 'video' \
             AND status = 'completed' AND url IS NOT NULL ORDER BY id ASC",
        )
        .bind(episode_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(urls)
    }

    async fn insert_video_merge(&self, merge: NewVideoMerge) -> Result<VideoMerge, StoreError> {
        let created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO video_merges (episode_id, drama_id, title, status, clips, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(merge.episode_id)
        .bind(merge.drama_id)
        .bind(&merge.title)
        .bind(JobStatus::Pending.as_ref())
        .bind(serde_json::to_string(&merge.clips)?)
        .bind(ts(created_at))
        .execute(&self.pool)
        .await?;
        Ok(VideoMerge {
            id: result.last_insert_rowid(),
            episode_id: merge.episode_id,
            drama_id: merge.drama_id,
            title: merge.title,
            status: JobStatus::Pending,
            clips: merge.clips,
            merged_url: None,
            duration: None,
            task_id: None,
            error_msg: None,
            created_at,
            completed_at: None,
        })
    }

    async fn get_video_merge(&self, id: i64) -> Result<Option<VideoMerge>, StoreError> {
        let row: Option<MergeRow> = sqlx::query_as(
            "SELECT id, episode_id, drama_id, title, status, clips, merged_url, duration, task_id, \
             error_msg, created_at, completed_at FROM video_merges WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(merge_from_row).transpose()
    }

    async fn insert_generation(&self, generation: NewGeneration) -> Result<Generation, StoreError> {
        let created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO generations (media, drama_id, episode_id, provider, prompt, status, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(generation.media.as_ref())
        .bind(generation.drama_id)
        .bind(generation.episode_id)
        .bind(&generation.provider)
        .bind(&generation.prompt)
        .bind(JobStatus::Pending.as_ref())
        .bind(ts(created_at))
        .execute(&self.pool)
        .await?;
        Ok(Generation {
            id: result.last_insert_rowid(),
            media: generation.media,
            drama_id: generation.drama_id,
            episode_id: generation.episode_id,
            provider: generation.provider,
            prompt: generation.prompt,
            status: JobStatus::Pending,
            url: None,
            task_id: None,
            error_msg: None,
            created_at,
            completed_at: None,
        })
    }

    async fn get_generation(&self, id: i64) -> Result<Option<Generation>, StoreError> {
        let row: Option<GenerationRow> = sqlx::query_as(
            "SELECT id, media, drama_id, episode_id, provider, prompt, status, url, task_id, \
             error_msg, created_at, completed_at FROM generations WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(generation_from_row).transpose()
    }

    async fn bind_task(
        &self,
        resource: ResourceRef,
        task_id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Binding, StoreError> {
        let (sql, table) = match resource {
            ResourceRef::Episode(_) => (
                "UPDATE episodes SET task_id = ?1, task_created_at = ?2, status = 'processing', \
                 error_msg = NULL \
                 WHERE id = ?3 AND (task_created_at IS NULL OR task_created_at <= ?2)",
                "episodes",
            ),
            ResourceRef::VideoMerge(_) => (
                "UPDATE video_merges SET task_id = ?1, task_created_at = ?2, status = 'processing', \
                 error_msg = NULL, completed_at = NULL \
                 WHERE id = ?3 AND (task_created_at IS NULL OR task_created_at <= ?2)",
                "video_merges",
            ),
            ResourceRef::Generation(_) => (
                "UPDATE generations SET task_id = ?1, task_created_at = ?2, status = 'processing', \
                 error_msg = NULL, completed_at = NULL \
                 WHERE id = ?3 AND (task_created_at IS NULL OR task_created_at <= ?2)",
                "generations",
            ),
        };
        let result = sqlx::query(sql)
            .bind(task_id)
            .bind(ts(created_at))
            .bind(resource.id())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 1 {
            return Ok(Binding::Bound);
        }

        let exists: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS(SELECT 1 FROM {table} WHERE id = ?1)"
        ))
        .bind(resource.id())
        .fetch_one(&self.pool)
        .await?;
        Ok(if exists { Binding::Superseded } else { Binding::Missing })
    }

    async fn apply_change(
        &self,
        id: i64,
        task_id: &str,
        change: &RecordChange,
    ) -> Result<bool, StoreError> {
        let now = ts(Utc::now());
        let query = match change {
            RecordChange::EpisodeFinalized { video_url, duration } => sqlx::query(
                "UPDATE episodes SET video_url = ?1, duration = ?2, status = 'completed', \
                 error_msg = NULL WHERE id = ?3 AND task_id = ?4",
            )
            .bind(video_url)
            .bind(*duration),
            RecordChange::EpisodeReverted { error } => sqlx::query(
                "UPDATE episodes SET status = 'draft', error_msg = ?1 WHERE id = ?2 AND task_id = ?3",
            )
            .bind(error),
            RecordChange::MergeCompleted { merged_url, duration } => sqlx::query(
                "UPDATE video_merges SET merged_url = ?1, duration = ?2, status = 'completed', \
                 error_msg = NULL, completed_at = COALESCE(completed_at, ?3) \
                 WHERE id = ?4 AND task_id = ?5",
            )
            .bind(merged_url)
            .bind(*duration)
            .bind(now),
            RecordChange::MergeFailed { error } => sqlx::query(
                "UPDATE video_merges SET status = 'failed', error_msg = ?1, \
                 completed_at = COALESCE(completed_at, ?2) WHERE id = ?3 AND task_id = ?4",
            )
            .bind(error)
            .bind(now),
            RecordChange::GenerationCompleted { url } => sqlx::query(
                "UPDATE generations SET url = ?1, status = 'completed', error_msg = NULL, \
                 completed_at = COALESCE(completed_at, ?2) WHERE id = ?3 AND task_id = ?4",
            )
            .bind(url)
            .bind(now),
            RecordChange::GenerationFailed { error } => sqlx::query(
                "UPDATE generations SET status = 'failed', error_msg = ?1, \
                 completed_at = COALESCE(completed_at, ?2) WHERE id = ?3 AND task_id = ?4",
            )
            .bind(error)
            .bind(now),
        };
        let result = query.bind(id).bind(task_id).execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::MediaKind;
    use crate::task::TaskKind;
    use serde_json::json;

    async fn store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn task_round_trips_through_sqlite() {
        let store = store().await;
        let task = TaskRecord::new(
            TaskKind::ImageGeneration,
            "5",
            Some(json!({"prompt": "a lighthouse at dusk"})),
        );
        store.insert_task(&task).await.unwrap();

        let loaded = store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(loaded.kind, TaskKind::ImageGeneration);
        assert_eq!(loaded.status, TaskStatus::Pending);
        assert_eq!(loaded.input, task.input);
        assert_eq!(
            loaded.created_at.timestamp_micros(),
            task.created_at.timestamp_micros()
        );
        assert!(store.get_task("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_is_conditional_on_status() {
        let store = store().await;
        let mut task = TaskRecord::new(TaskKind::VideoMerge, "1", None);
        store.insert_task(&task).await.unwrap();

        task.status = TaskStatus::Processing;
        task.progress = 30;
        assert!(store
            .update_task_if_status(&task, TaskStatus::Pending)
            .await
            .unwrap());
        assert!(!store
            .update_task_if_status(&task, TaskStatus::Pending)
            .await
            .unwrap());

        let loaded = store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Processing);
        assert_eq!(loaded.progress, 30);
    }

    #[tokio::test]
    async fn query_filters_and_pages_newest_first() {
        let store = store().await;
        let mut ids = Vec::new();
        for _ in 0..3 {
            let task = TaskRecord::new(TaskKind::VideoGeneration, "9", None);
            store.insert_task(&task).await.unwrap();
            ids.push(task.id);
        }
        store
            .insert_task(&TaskRecord::new(TaskKind::VideoMerge, "10", None))
            .await
            .unwrap();

        let page = store
            .query_tasks(&TaskQuery {
                limit: Some(2),
                ..TaskQuery::for_resource("9")
            })
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].id, ids[2]);
        assert_eq!(page.items[1].id, ids[1]);

        let merges = store
            .query_tasks(&TaskQuery {
                kind: Some(TaskKind::VideoMerge),
                ..TaskQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(merges.total, 1);
    }

    #[tokio::test]
    async fn stale_task_cannot_overwrite_generation() {
        let store = store().await;
        let generation = store
            .insert_generation(NewGeneration {
                media: MediaKind::Video,
                drama_id: 1,
                episode_id: Some(3),
                provider: "doubao".into(),
                prompt: "rain on neon".into(),
            })
            .await
            .unwrap();

        let resource = ResourceRef::Generation(generation.id);
        let older = Utc::now();
        let newer = older + chrono::Duration::milliseconds(1);
        assert_eq!(store.bind_task(resource, "old", older).await.unwrap(), Binding::Bound);
        assert_eq!(store.bind_task(resource, "new", newer).await.unwrap(), Binding::Bound);

        let stale = RecordChange::GenerationCompleted { url: "old.mp4".into() };
        assert!(!store.apply_change(generation.id, "old", &stale).await.unwrap());

        let fresh = RecordChange::GenerationCompleted { url: "new.mp4".into() };
        assert!(store.apply_change(generation.id, "new", &fresh).await.unwrap());

        let loaded = store.get_generation(generation.id).await.unwrap().unwrap();
        assert_eq!(loaded.url.as_deref(), Some("new.mp4"));
        assert_eq!(loaded.status, JobStatus::Completed);
        assert_eq!(store.episode_clips(3).await.unwrap(), vec!["new.mp4".to_owned()]);
    }

    #[tokio::test]
    async fn older_task_bound_last_does_not_take_the_record() {
        let store = store().await;
        let merge = store
            .insert_video_merge(NewVideoMerge {
                episode_id: 4,
                drama_id: 1,
                title: None,
                clips: vec!["a.mp4".into(), "b.mp4".into()],
            })
            .await
            .unwrap();
        let resource = ResourceRef::VideoMerge(merge.id);
        let older = Utc::now();
        let newer = older + chrono::Duration::milliseconds(2);

        assert_eq!(store.bind_task(resource, "b", newer).await.unwrap(), Binding::Bound);
        assert_eq!(store.bind_task(resource, "a", older).await.unwrap(), Binding::Superseded);
        assert_eq!(
            store
                .bind_task(ResourceRef::VideoMerge(merge.id + 100), "c", newer)
                .await
                .unwrap(),
            Binding::Missing
        );

        let loaded = store.get_video_merge(merge.id).await.unwrap().unwrap();
        assert_eq!(loaded.task_id.as_deref(), Some("b"));
        assert_eq!(loaded.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn unreadable_timestamp_is_reported_as_corrupt() {
        let store = store().await;
        let task = TaskRecord::new(TaskKind::VideoMerge, "1", None);
        store.insert_task(&task).await.unwrap();
        sqlx::query("UPDATE tasks SET completed_at = 'garbage' WHERE id = ?1")
            .bind(&task.id)
            .execute(store.pool())
            .await
            .unwrap();

        let err = store.get_task(&task.id).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(ref msg) if msg.contains("garbage")));
    }

    #[tokio::test]
    async fn prune_only_removes_old_terminal_tasks() {
        let store = store().await;
        let mut done = TaskRecord::new(TaskKind::ImageGeneration, "1", None);
        done.status = TaskStatus::Completed;
        done.completed_at = Some(Utc::now() - chrono::Duration::days(40));
        store.insert_task(&done).await.unwrap();
        let running = TaskRecord::new(TaskKind::ImageGeneration, "1", None);
        store.insert_task(&running).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(30);
        assert_eq!(store.delete_terminal_before(cutoff).await.unwrap(), 1);
        assert!(store.get_task(&done.id).await.unwrap().is_none());
        assert_eq!(store.unfinished_tasks().await.unwrap().len(), 1);
    }
}
