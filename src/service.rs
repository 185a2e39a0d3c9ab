#![forbid(unsafe_code)]

//! Query and control operations exposed to API clients.
//!
//! Starting a job returns as soon as the record exists; ingestion runs on a
//! tracked background task so shutdown can wait for it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::jobs::{
    Item, ItemStatus, Job, JobKind, JobStatus, JobStore, JobUpdate, NewItem, NewJob,
    ProviderMetadata, SecondaryStream, UpdateGuard,
};
use crate::orchestrator::Orchestrator;
use crate::playback::{PlaybackResolver, PlaybackSelection};
use crate::uploads::{UploadArea, is_remote};
use crate::youtube::{ChannelDirectory, DEFAULT_CHANNEL_VIDEOS, MAX_CHANNEL_VIDEOS};

const DEFAULT_SECONDARY_TYPE: &str = "user-stream";
const DEFAULT_SECONDARY_STATUS: &str = "active";

/// Item as shown to clients. Source paths and provider ids stay internal.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemView {
    pub name: String,
    pub status: ItemStatus,
    pub playback_url: Option<String>,
    pub thumbnail: Option<String>,
    pub error: Option<String>,
}

impl From<&Item> for ItemView {
    fn from(item: &Item) -> Self {
        Self {
            name: item.name.clone(),
            status: item.status,
            playback_url: item.playback_url.clone(),
            thumbnail: item.thumbnail.clone(),
            error: item.error.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub status: JobStatus,
    pub playback_url: Option<String>,
    pub thumbnail: Option<String>,
    pub error: Option<String>,
    pub current_item_index: usize,
    pub items: Vec<ItemView>,
    pub secondary_streams: Vec<SecondaryStream>,
}

impl From<&Job> for JobStatusView {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            name: job.name.clone(),
            kind: job.kind,
            status: job.status,
            playback_url: job.playback_url.clone(),
            thumbnail: job
                .provider_metadata
                .thumbnail
                .clone()
                .or_else(|| job.current_item().and_then(|item| item.thumbnail.clone())),
            error: job.error.clone(),
            current_item_index: job.current_item_index,
            items: job.items.iter().map(ItemView::from).collect(),
            secondary_streams: job.secondary_streams.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSecondaryStream {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    pub url: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Clone)]
pub struct StreamService {
    store: Arc<JobStore>,
    uploads: Arc<Orchestrator>,
    channels: Arc<Orchestrator>,
    playback: PlaybackResolver,
    directory: Option<Arc<dyn ChannelDirectory>>,
    upload_area: Option<UploadArea>,
    tasks: TaskTracker,
}

impl StreamService {
    pub fn new(store: Arc<JobStore>, uploads: Orchestrator, channels: Orchestrator) -> Self {
        Self {
            playback: PlaybackResolver::new(store.clone()),
            store,
            uploads: Arc::new(uploads),
            channels: Arc::new(channels),
            directory: None,
            upload_area: None,
            tasks: TaskTracker::new(),
        }
    }

    pub fn with_directory(mut self, directory: Arc<dyn ChannelDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Confines local upload sources to `uploads`.
    pub fn with_uploads(mut self, uploads: UploadArea) -> Self {
        self.upload_area = Some(uploads);
        self
    }

    /// Creates the job and schedules its ingestion.
    pub async fn start_job(&self, mut new_job: NewJob) -> Result<JobStatusView> {
        if let (JobKind::Upload, Some(uploads)) = (new_job.kind, &self.upload_area) {
            for item in &mut new_job.items {
                let source = item.source_ref.trim();
                if is_remote(source) {
                    continue;
                }
                let path = uploads.confine(source).await?;
                item.source_ref = path.to_string_lossy().into_owned();
            }
        }
        let job = self.store.create(new_job).await?;
        info!(job_id = %job.id, name = %job.name, kind = job.kind.as_str(), "job created");
        self.schedule(&job);
        Ok(JobStatusView::from(&job))
    }

    /// Looks the channel up and starts a job over its most recent videos.
    pub async fn start_youtube_channel(
        &self,
        channel_name: &str,
        video_count: Option<u32>,
        shuffle: bool,
    ) -> Result<JobStatusView> {
        let channel_name = channel_name.trim();
        if channel_name.is_empty() {
            return Err(Error::validation("channelName must not be empty"));
        }
        let directory = self
            .directory
            .as_ref()
            .ok_or_else(|| Error::config("YOUTUBE_API_KEY is not configured"))?;
        let count = video_count
            .unwrap_or(DEFAULT_CHANNEL_VIDEOS)
            .clamp(1, MAX_CHANNEL_VIDEOS);

        let listing = directory.find_channel(channel_name, count).await?;
        if listing.videos.is_empty() {
            return Err(Error::validation(format!(
                "channel {} has no videos",
                listing.title
            )));
        }

        let video_count = listing.videos.len() as i64;
        let new_job = NewJob {
            name: format!("YouTube: {}", listing.title),
            kind: JobKind::Youtube,
            items: listing
                .videos
                .into_iter()
                .map(|video| NewItem {
                    name: video.title,
                    source_ref: video.id,
                    thumbnail: video.thumbnail,
                })
                .collect(),
            provider_metadata: ProviderMetadata {
                thumbnail: listing.thumbnail,
                shuffle,
                external_collection_id: Some(listing.channel_id),
                collection_title: Some(listing.title),
                video_count: Some(video_count),
                ..ProviderMetadata::default()
            },
        };
        self.start_job(new_job).await
    }

    /// Stops one job, or every active job when `id` is `None`.
    pub async fn stop_job(&self, id: Option<&str>) -> Result<u64> {
        match id {
            Some(id) => {
                self.store
                    .update(id, &JobUpdate::status(JobStatus::Stopped), UpdateGuard::NONE)
                    .await?;
                info!(job_id = id, "job stopped");
                Ok(1)
            }
            None => {
                let stopped = self.store.stop_all_active().await?;
                info!(stopped, "stopped all active jobs");
                Ok(stopped)
            }
        }
    }

    pub async fn get_status(&self, id: &str) -> Result<JobStatusView> {
        let job = self.store.get(id).await?;
        Ok(JobStatusView::from(&job))
    }

    pub async fn list_active(&self) -> Result<Vec<JobStatusView>> {
        let jobs = self.store.list_by_status(JobStatus::Active).await?;
        Ok(jobs.iter().map(JobStatusView::from).collect())
    }

    pub async fn append_secondary_stream(
        &self,
        id: &str,
        stream: NewSecondaryStream,
    ) -> Result<JobStatusView> {
        let url = stream.url.trim().to_string();
        if url.is_empty() {
            return Err(Error::validation("stream url must not be empty"));
        }
        let entry = SecondaryStream {
            id: non_blank(stream.id)
                .unwrap_or_else(|| chrono::Utc::now().timestamp_millis().to_string()),
            name: match stream.name.trim() {
                "" => url.clone(),
                name => name.to_string(),
            },
            url,
            kind: non_blank(stream.kind).unwrap_or_else(|| DEFAULT_SECONDARY_TYPE.to_string()),
            status: non_blank(stream.status)
                .unwrap_or_else(|| DEFAULT_SECONDARY_STATUS.to_string()),
        };
        self.store.append_secondary_stream(id, &entry).await?;
        self.get_status(id).await
    }

    pub async fn next_item(&self, id: &str) -> Result<Option<PlaybackSelection>> {
        self.playback.next(id).await
    }

    /// Queues the next not-yet-ingested item of an active upload job. The job
    /// keeps its current playback URL until the new item is ready.
    pub async fn queue_next_item(&self, id: &str) -> Result<JobStatusView> {
        let job = self.store.get(id).await?;
        if job.kind != JobKind::Upload || job.status != JobStatus::Active {
            return Err(Error::validation(format!(
                "job {id} is {}; only active upload jobs can advance",
                job.status.as_str()
            )));
        }
        let Some(next) = (job.current_item_index + 1..job.items.len())
            .find(|&index| job.items[index].status == ItemStatus::Queued)
        else {
            return Err(Error::validation(format!("job {id} has no queued items left")));
        };

        let update = JobUpdate {
            current_item_index: Some(next),
            ..JobUpdate::status(JobStatus::Queued)
        };
        let guard = UpdateGuard {
            status_is: Some(JobStatus::Active),
            current_item_index_is: Some(job.current_item_index),
            ..UpdateGuard::NONE
        };
        if self.store.update(id, &update, guard).await? {
            info!(job_id = id, index = next, "queued next item");
            self.schedule(&job);
        }
        self.get_status(id).await
    }

    pub async fn delete_job(&self, id: &str) -> Result<()> {
        self.store.delete(id).await?;
        info!(job_id = id, "job deleted");
        Ok(())
    }

    /// Waits for every scheduled ingestion to finish.
    pub async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    fn schedule(&self, job: &Job) {
        let orchestrator = match job.kind {
            JobKind::Upload => self.uploads.clone(),
            JobKind::Youtube => self.channels.clone(),
        };
        let store = self.store.clone();
        let id = job.id.clone();
        self.tasks.spawn(async move {
            match orchestrator.run(&id).await {
                Ok(status) => info!(job_id = %id, status = status.as_str(), "ingestion settled"),
                Err(Error::NotFound(_)) => warn!(job_id = %id, "job vanished before ingestion"),
                Err(err) => {
                    error!(job_id = %id, "ingestion aborted: {err}");
                    let update = JobUpdate::failed(err.to_string());
                    if let Err(err) = store.update(&id, &update, UpdateGuard::not_stopped()).await {
                        error!(job_id = %id, "could not record ingestion failure: {err}");
                    }
                }
            }
        });
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
