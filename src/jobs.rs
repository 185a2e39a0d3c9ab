#![forbid(unsafe_code)]

//! Job record store.
//!
//! A job's items and provider metadata live as JSON columns on the `jobs` row
//! (the same way the catalog once stored format lists), while secondary
//! streams get their own table so that concurrent appends are plain INSERTs and
//! can never be lost by a read-modify-write of the parent row.

use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Builder, Connection, Row, params};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Active,
    Error,
    Stopped,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Active => "active",
            Self::Error => "error",
            Self::Stopped => "stopped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "active" => Some(Self::Active),
            "error" => Some(Self::Error),
            "stopped" => Some(Self::Stopped),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Queued,
    Processing,
    Ready,
    Error,
}

/// Selects how the orchestrator walks a job's items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Uploaded files; one playable item at a time.
    #[default]
    Upload,
    /// YouTube channel videos; every item is attempted in a single pass.
    Youtube,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Youtube => "youtube",
        }
    }

    fn parse(value: &str) -> Self {
        match value {
            "youtube" => Self::Youtube,
            _ => Self::Upload,
        }
    }
}

/// One source video inside a job. Owned by its job and never shared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub name: String,
    /// Local file path of an upload, or a YouTube video id.
    pub source_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_asset_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_playback_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playback_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub status: ItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Item {
    pub fn new(name: impl Into<String>, source_ref: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_ref: source_ref.into(),
            external_asset_id: None,
            external_playback_id: None,
            playback_url: None,
            thumbnail: None,
            status: ItemStatus::Queued,
            error: None,
        }
    }
}

/// Item shape accepted when a job is created.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewItem {
    #[serde(default)]
    pub name: String,
    #[serde(alias = "path")]
    pub source_ref: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

/// Structured data contributed by the active adapter or the job's origin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_asset_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_playback_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub shuffle: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_collection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_count: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecondaryStream {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub name: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub items: Vec<Item>,
    pub current_item_index: usize,
    pub playback_url: Option<String>,
    pub error: Option<String>,
    pub provider_metadata: ProviderMetadata,
    pub secondary_streams: Vec<SecondaryStream>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn current_item(&self) -> Option<&Item> {
        self.items.get(self.current_item_index)
    }

    pub fn ready_indices(&self) -> Vec<usize> {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.status == ItemStatus::Ready)
            .map(|(index, _)| index)
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewJob {
    pub name: String,
    pub kind: JobKind,
    pub items: Vec<NewItem>,
    pub provider_metadata: ProviderMetadata,
}

/// Partial update of a job row. `None` leaves the column untouched; for the
/// nullable columns `Some(None)` clears the value.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub current_item_index: Option<usize>,
    pub playback_url: Option<Option<String>>,
    pub error: Option<Option<String>>,
    pub items: Option<Vec<Item>>,
    pub provider_metadata: Option<ProviderMetadata>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// `status = error` together with the reason, keeping the invariant that an
    /// errored job always carries a message.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Error),
            error: Some(Some(reason.into())),
            ..Self::default()
        }
    }

    pub fn with_items(mut self, items: Vec<Item>) -> Self {
        self.items = Some(items);
        self
    }
}

/// Preconditions checked inside the same UPDATE statement that applies a
/// [`JobUpdate`], so check and write cannot interleave with another writer.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateGuard {
    pub status_is: Option<JobStatus>,
    pub not_stopped: bool,
    pub current_item_index_is: Option<usize>,
}

impl UpdateGuard {
    pub const NONE: Self = Self {
        status_is: None,
        not_stopped: false,
        current_item_index_is: None,
    };

    pub fn not_stopped() -> Self {
        Self {
            not_stopped: true,
            ..Self::NONE
        }
    }

    pub fn status_is(status: JobStatus) -> Self {
        Self {
            status_is: Some(status),
            ..Self::NONE
        }
    }
}

async fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        PRAGMA foreign_keys=ON;
        "#,
    )
    .await?;
    Ok(())
}

async fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            kind TEXT NOT NULL DEFAULT 'upload',
            status TEXT NOT NULL DEFAULT 'queued',
            current_item_index INTEGER NOT NULL DEFAULT 0,
            playback_url TEXT,
            error TEXT,
            items_json TEXT NOT NULL DEFAULT '[]',
            provider_metadata_json TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS secondary_streams (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
            stream_id TEXT NOT NULL,
            name TEXT NOT NULL DEFAULT '',
            url TEXT NOT NULL DEFAULT '',
            stream_type TEXT NOT NULL DEFAULT 'user-stream',
            status TEXT NOT NULL DEFAULT 'active'
        );

        CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
        CREATE INDEX IF NOT EXISTS idx_secondary_streams_job ON secondary_streams(job_id);
        "#,
    )
    .await?;
    Ok(())
}

const JOB_COLUMNS: &str = r#"
    id, name, kind, status, current_item_index, playback_url, error,
    items_json, provider_metadata_json, created_at, updated_at
"#;

/// libsql-backed store for jobs, keyed by generated id.
pub struct JobStore {
    conn: Connection,
}

impl std::fmt::Debug for JobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStore").finish_non_exhaustive()
    }
}

impl JobStore {
    /// Opens (and if necessary creates) the database and its schema.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Builder::new_local(path).build().await?;
        let conn = db.connect()?;
        configure_connection(&conn).await?;
        ensure_schema(&conn).await?;
        Ok(Self { conn })
    }

    /// Persists a new job in `queued` status.
    pub async fn create(&self, new_job: NewJob) -> Result<Job> {
        let name = new_job.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::validation("job name must not be empty"));
        }
        if new_job.items.is_empty() {
            return Err(Error::validation("job must contain at least one item"));
        }

        let mut items = Vec::with_capacity(new_job.items.len());
        for (index, raw) in new_job.items.into_iter().enumerate() {
            let source_ref = raw.source_ref.trim().to_string();
            if source_ref.is_empty() {
                return Err(Error::validation(format!(
                    "item {index} is missing its source reference"
                )));
            }
            let name = match raw.name.trim() {
                "" => source_ref.clone(),
                name => name.to_string(),
            };
            let mut item = Item::new(name, source_ref);
            item.thumbnail = raw.thumbnail;
            items.push(item);
        }

        let now = Utc::now();
        let id = uuid::Uuid::new_v4().simple().to_string();
        let items_json = serde_json::to_string(&items)?;
        let metadata_json = serde_json::to_string(&new_job.provider_metadata)?;

        self.conn
            .execute(
                r#"
                INSERT INTO jobs (
                    id, name, kind, status, current_item_index, playback_url, error,
                    items_json, provider_metadata_json, created_at, updated_at
                ) VALUES (?1, ?2, ?3, 'queued', 0, NULL, NULL, ?4, ?5, ?6, ?6)
                "#,
                params![
                    id.as_str(),
                    name.as_str(),
                    new_job.kind.as_str(),
                    items_json,
                    metadata_json,
                    now.timestamp_millis(),
                ],
            )
            .await?;

        Ok(Job {
            id,
            name,
            kind: new_job.kind,
            status: JobStatus::Queued,
            items,
            current_item_index: 0,
            playback_url: None,
            error: None,
            provider_metadata: new_job.provider_metadata,
            secondary_streams: Vec::new(),
            created_at: from_millis(now.timestamp_millis()),
            updated_at: from_millis(now.timestamp_millis()),
        })
    }

    pub async fn get(&self, id: &str) -> Result<Job> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id],
            )
            .await?;
        let Some(row) = rows.next().await? else {
            return Err(Error::not_found(format!("job {id}")));
        };
        let mut job = row_to_job(&row)?;
        job.secondary_streams = self.secondary_streams(&job.id).await?;
        Ok(job)
    }

    /// Applies `update` only if `guard` holds at write time. Returns whether the
    /// row changed; an unknown id is reported as `NotFound`.
    pub async fn update(&self, id: &str, update: &JobUpdate, guard: UpdateGuard) -> Result<bool> {
        let items_json = update
            .items
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let metadata_json = update
            .provider_metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let (set_playback, playback_url) = split_nullable(&update.playback_url);
        let (set_error, error) = split_nullable(&update.error);

        let changed = self
            .conn
            .execute(
                r#"
                UPDATE jobs SET
                    status = COALESCE(?2, status),
                    current_item_index = COALESCE(?3, current_item_index),
                    playback_url = CASE WHEN ?4 THEN ?5 ELSE playback_url END,
                    error = CASE WHEN ?6 THEN ?7 ELSE error END,
                    items_json = COALESCE(?8, items_json),
                    provider_metadata_json = COALESCE(?9, provider_metadata_json),
                    updated_at = ?10
                WHERE id = ?1
                  AND (?11 IS NULL OR status = ?11)
                  AND (?12 = 0 OR status != 'stopped')
                  AND (?13 IS NULL OR current_item_index = ?13)
                "#,
                params![
                    id,
                    update.status.map(JobStatus::as_str),
                    update.current_item_index.map(|index| index as i64),
                    set_playback,
                    playback_url,
                    set_error,
                    error,
                    items_json,
                    metadata_json,
                    Utc::now().timestamp_millis(),
                    guard.status_is.map(JobStatus::as_str),
                    guard.not_stopped as i64,
                    guard.current_item_index_is.map(|index| index as i64),
                ],
            )
            .await?;

        if changed == 0 && !self.exists(id).await? {
            return Err(Error::not_found(format!("job {id}")));
        }
        Ok(changed > 0)
    }

    pub async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ?1 ORDER BY created_at ASC, rowid ASC"
                ),
                params![status.as_str()],
            )
            .await?;
        let mut jobs = Vec::new();
        while let Some(row) = rows.next().await? {
            jobs.push(row_to_job(&row)?);
        }
        for job in &mut jobs {
            job.secondary_streams = self.secondary_streams(&job.id).await?;
        }
        Ok(jobs)
    }

    /// Appends one secondary stream as a single INSERT, so concurrent callers
    /// never overwrite each other's entries.
    pub async fn append_secondary_stream(&self, id: &str, entry: &SecondaryStream) -> Result<()> {
        let inserted = self
            .conn
            .execute(
                r#"
                INSERT INTO secondary_streams (job_id, stream_id, name, url, stream_type, status)
                SELECT ?1, ?2, ?3, ?4, ?5, ?6
                WHERE EXISTS (SELECT 1 FROM jobs WHERE id = ?1)
                "#,
                params![
                    id,
                    entry.id.as_str(),
                    entry.name.as_str(),
                    entry.url.as_str(),
                    entry.kind.as_str(),
                    entry.status.as_str(),
                ],
            )
            .await?;
        if inserted == 0 {
            return Err(Error::not_found(format!("job {id}")));
        }
        Ok(())
    }

    /// Moves every `active` job to `stopped`, returning how many changed.
    pub async fn stop_all_active(&self) -> Result<u64> {
        let changed = self
            .conn
            .execute(
                "UPDATE jobs SET status = 'stopped', updated_at = ?1 WHERE status = 'active'",
                params![Utc::now().timestamp_millis()],
            )
            .await?;
        Ok(changed)
    }

    /// Removes a job; its secondary streams go with it through the FK cascade.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let removed = self
            .conn
            .execute("DELETE FROM jobs WHERE id = ?1", params![id])
            .await?;
        if removed == 0 {
            return Err(Error::not_found(format!("job {id}")));
        }
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query("SELECT 1 FROM jobs WHERE id = ?1", params![id])
            .await?;
        Ok(rows.next().await?.is_some())
    }

    async fn secondary_streams(&self, id: &str) -> Result<Vec<SecondaryStream>> {
        let mut rows = self
            .conn
            .query(
                r#"
                SELECT stream_id, name, url, stream_type, status
                FROM secondary_streams
                WHERE job_id = ?1
                ORDER BY seq ASC
                "#,
                params![id],
            )
            .await?;
        let mut streams = Vec::new();
        while let Some(row) = rows.next().await? {
            streams.push(SecondaryStream {
                id: row.get(0)?,
                name: row.get(1)?,
                url: row.get(2)?,
                kind: row.get(3)?,
                status: row.get(4)?,
            });
        }
        Ok(streams)
    }
}

fn split_nullable(value: &Option<Option<String>>) -> (i64, Option<String>) {
    match value {
        Some(inner) => (1, inner.clone()),
        None => (0, None),
    }
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

/// Converts a row selected with `JOB_COLUMNS` into a `Job` (without its
/// secondary streams, which are loaded separately).
fn row_to_job(row: &Row) -> Result<Job> {
    let status_raw: String = row.get(3)?;
    let status = JobStatus::parse(&status_raw)
        .ok_or_else(|| Error::validation(format!("unknown stored status {status_raw}")))?;
    let kind_raw: String = row.get(2)?;
    let items_json: String = row.get(7)?;
    let metadata_json: String = row.get(8)?;
    let current_item_index: i64 = row.get(4)?;

    Ok(Job {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: JobKind::parse(&kind_raw),
        status,
        items: serde_json::from_str(&items_json)?,
        current_item_index: usize::try_from(current_item_index).unwrap_or(0),
        playback_url: row.get(5)?,
        error: row.get(6)?,
        provider_metadata: serde_json::from_str(&metadata_json)?,
        secondary_streams: Vec::new(),
        created_at: from_millis(row.get(9)?),
        updated_at: from_millis(row.get(10)?),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;
    use tokio::task::JoinSet;

    pub(crate) fn upload_job(name: &str, sources: &[&str]) -> NewJob {
        NewJob {
            name: name.into(),
            kind: JobKind::Upload,
            items: sources
                .iter()
                .enumerate()
                .map(|(index, source)| NewItem {
                    name: format!("v{}", index + 1),
                    source_ref: (*source).into(),
                    thumbnail: None,
                })
                .collect(),
            provider_metadata: ProviderMetadata::default(),
        }
    }

    pub(crate) async fn create_store() -> (tempfile::TempDir, Arc<JobStore>) {
        let dir = tempdir().unwrap();
        let store = JobStore::open(&dir.path().join("db/ingest.db"))
            .await
            .unwrap();
        (dir, Arc::new(store))
    }

    fn secondary(id: &str) -> SecondaryStream {
        SecondaryStream {
            id: id.into(),
            name: format!("stream {id}"),
            url: format!("https://cdn.example/{id}.m3u8"),
            kind: "user-stream".into(),
            status: "active".into(),
        }
    }

    #[tokio::test]
    async fn open_creates_schema_and_enables_wal() -> Result<()> {
        let (dir, _store) = create_store().await;
        let path = dir.path().join("db/ingest.db");
        assert!(path.exists());

        let db = Builder::new_local(&path).build().await?;
        let conn = db.connect()?;
        configure_connection(&conn).await?;
        let mut rows = conn.query("PRAGMA journal_mode", params![]).await?;
        let journal: String = rows.next().await?.expect("journal row").get(0)?;
        assert_eq!(journal.to_lowercase(), "wal");

        for table in ["jobs", "secondary_streams"] {
            let mut rows = conn
                .query(
                    "SELECT name FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                )
                .await?;
            assert!(rows.next().await?.is_some(), "missing table {table}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn store_debug_output_is_opaque() {
        let (_dir, store) = create_store().await;
        assert_eq!(format!("{store:?}"), "JobStore { .. }");
        let resolver = crate::playback::PlaybackResolver::new(store);
        assert!(format!("{resolver:?}").contains("JobStore { .. }"));
    }

    #[tokio::test]
    async fn create_and_get_roundtrip() -> Result<()> {
        let (_dir, store) = create_store().await;
        let created = store
            .create(upload_job("Test", &["/tmp/v1.mp4", "/tmp/v2.mp4"]))
            .await?;
        assert_eq!(created.status, JobStatus::Queued);

        let fetched = store.get(&created.id).await?;
        assert_eq!(fetched.name, "Test");
        assert_eq!(fetched.kind, JobKind::Upload);
        assert_eq!(fetched.items.len(), 2);
        assert_eq!(fetched.items[1].source_ref, "/tmp/v2.mp4");
        assert_eq!(fetched.items[0].status, ItemStatus::Queued);
        assert_eq!(fetched.current_item_index, 0);
        assert!(fetched.playback_url.is_none());
        assert!(fetched.secondary_streams.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn create_rejects_empty_name_and_items() {
        let (_dir, store) = create_store().await;
        let err = store.create(upload_job("  ", &["/a.mp4"])).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = store.create(upload_job("Empty", &[])).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = store.create(upload_job("Blank", &[" "])).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn item_names_default_to_source() -> Result<()> {
        let (_dir, store) = create_store().await;
        let mut new_job = upload_job("Named", &["/x.mp4"]);
        new_job.items[0].name = String::new();
        let job = store.create(new_job).await?;
        assert_eq!(job.items[0].name, "/x.mp4");
        Ok(())
    }

    #[tokio::test]
    async fn get_unknown_job_is_not_found() {
        let (_dir, store) = create_store().await;
        let err = store.get("ghost").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        let err = store
            .update("ghost", &JobUpdate::status(JobStatus::Stopped), UpdateGuard::NONE)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn partial_update_leaves_other_fields_alone() -> Result<()> {
        let (_dir, store) = create_store().await;
        let job = store.create(upload_job("Partial", &["/a.mp4"])).await?;

        let update = JobUpdate {
            playback_url: Some(Some("https://cdn/a.m3u8".into())),
            ..JobUpdate::status(JobStatus::Active)
        };
        assert!(store.update(&job.id, &update, UpdateGuard::NONE).await?);

        let update = JobUpdate {
            current_item_index: Some(0),
            ..JobUpdate::default()
        };
        store.update(&job.id, &update, UpdateGuard::NONE).await?;

        let fetched = store.get(&job.id).await?;
        assert_eq!(fetched.status, JobStatus::Active);
        assert_eq!(fetched.playback_url.as_deref(), Some("https://cdn/a.m3u8"));
        assert_eq!(fetched.items.len(), 1);

        let clear = JobUpdate {
            playback_url: Some(None),
            ..JobUpdate::default()
        };
        store.update(&job.id, &clear, UpdateGuard::NONE).await?;
        assert!(store.get(&job.id).await?.playback_url.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn guards_are_checked_inside_the_write() -> Result<()> {
        let (_dir, store) = create_store().await;
        let job = store.create(upload_job("Guarded", &["/a.mp4"])).await?;

        let claim = JobUpdate::status(JobStatus::Processing);
        let guard = UpdateGuard::status_is(JobStatus::Queued);
        assert!(store.update(&job.id, &claim, guard).await?);
        assert!(!store.update(&job.id, &claim, guard).await?);

        store
            .update(&job.id, &JobUpdate::status(JobStatus::Stopped), UpdateGuard::NONE)
            .await?;
        let late = JobUpdate::status(JobStatus::Active);
        assert!(!store.update(&job.id, &late, UpdateGuard::not_stopped()).await?);
        assert_eq!(store.get(&job.id).await?.status, JobStatus::Stopped);

        let moved = JobUpdate {
            current_item_index: Some(0),
            ..JobUpdate::default()
        };
        let wrong_index = UpdateGuard {
            current_item_index_is: Some(3),
            ..UpdateGuard::NONE
        };
        assert!(!store.update(&job.id, &moved, wrong_index).await?);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_secondary_appends_are_all_kept() -> Result<()> {
        let (_dir, store) = create_store().await;
        let job = store.create(upload_job("Party", &["/a.mp4"])).await?;

        let mut tasks = JoinSet::new();
        for index in 0..16 {
            let store = store.clone();
            let id = job.id.clone();
            tasks.spawn(async move {
                store
                    .append_secondary_stream(&id, &secondary(&format!("s{index}")))
                    .await
            });
        }
        // A parent-row update racing the appends must not drop any of them.
        store
            .update(
                &job.id,
                &JobUpdate::status(JobStatus::Active).with_items(job.items.clone()),
                UpdateGuard::NONE,
            )
            .await?;
        while let Some(result) = tasks.join_next().await {
            result.expect("task panicked")?;
        }

        let fetched = store.get(&job.id).await?;
        assert_eq!(fetched.secondary_streams.len(), 16);
        assert_eq!(fetched.secondary_streams[0].kind, "user-stream");
        Ok(())
    }

    #[tokio::test]
    async fn append_to_unknown_job_is_not_found() {
        let (_dir, store) = create_store().await;
        let err = store
            .append_secondary_stream("ghost", &secondary("s1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn list_by_status_and_stop_all_active() -> Result<()> {
        let (_dir, store) = create_store().await;
        let first = store.create(upload_job("One", &["/1.mp4"])).await?;
        let second = store.create(upload_job("Two", &["/2.mp4"])).await?;
        let third = store.create(upload_job("Three", &["/3.mp4"])).await?;
        for id in [&first.id, &second.id] {
            store
                .update(id, &JobUpdate::status(JobStatus::Active), UpdateGuard::NONE)
                .await?;
        }
        store.append_secondary_stream(&first.id, &secondary("s1")).await?;

        let active = store.list_by_status(JobStatus::Active).await?;
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].id, first.id);
        assert_eq!(active[0].secondary_streams.len(), 1);

        assert_eq!(store.stop_all_active().await?, 2);
        assert!(store.list_by_status(JobStatus::Active).await?.is_empty());
        assert_eq!(store.get(&third.id).await?.status, JobStatus::Queued);
        Ok(())
    }

    #[tokio::test]
    async fn delete_cascades_to_secondary_streams() -> Result<()> {
        let (_dir, store) = create_store().await;
        let job = store.create(upload_job("Gone", &["/a.mp4"])).await?;
        store.append_secondary_stream(&job.id, &secondary("s1")).await?;

        store.delete(&job.id).await?;
        assert!(matches!(store.get(&job.id).await, Err(Error::NotFound(_))));
        assert!(store.secondary_streams(&job.id).await?.is_empty());
        assert!(matches!(store.delete(&job.id).await, Err(Error::NotFound(_))));
        Ok(())
    }

    #[test]
    fn ready_indices_only_lists_ready_items() {
        let mut items = vec![Item::new("a", "a"), Item::new("b", "b"), Item::new("c", "c")];
        items[0].status = ItemStatus::Ready;
        items[2].status = ItemStatus::Ready;
        items[1].status = ItemStatus::Error;
        let job = Job {
            id: "j".into(),
            name: "j".into(),
            kind: JobKind::Youtube,
            status: JobStatus::Active,
            items,
            current_item_index: 1,
            playback_url: None,
            error: None,
            provider_metadata: ProviderMetadata::default(),
            secondary_streams: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(job.ready_indices(), vec![0, 2]);
        assert_eq!(job.current_item().map(|item| item.name.as_str()), Some("b"));
    }
}
