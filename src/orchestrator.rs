#![forbid(unsafe_code)]

//! Drives a job from `queued` to `active` or `error`.
//!
//! Every write made after an adapter call carries a "not stopped" guard, so a
//! stop that lands while media work is in flight always wins.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::adapters::{Artifact, ItemContext, ItemOutcome, SourceAdapter};
use crate::error::Result;
use crate::jobs::{
    Item, ItemStatus, Job, JobKind, JobStatus, JobStore, JobUpdate, SecondaryStream, UpdateGuard,
};
use crate::uploads::UploadArea;

pub struct Orchestrator {
    store: Arc<JobStore>,
    adapter: Arc<dyn SourceAdapter>,
    uploads: Option<UploadArea>,
}

impl Orchestrator {
    pub fn new(store: Arc<JobStore>, adapter: Arc<dyn SourceAdapter>) -> Self {
        Self {
            store,
            adapter,
            uploads: None,
        }
    }

    /// Consumed sources are removed from `uploads` once their job is active.
    /// Without it, sources are never deleted.
    pub fn with_uploads(mut self, uploads: UploadArea) -> Self {
        self.uploads = Some(uploads);
        self
    }

    pub fn adapter_name(&self) -> &'static str {
        self.adapter.name()
    }

    /// Runs one processing pass and returns the status the job settled in.
    ///
    /// Safe to call repeatedly or concurrently for the same job: only the caller
    /// that moves the job out of `queued` does any work, the others return the
    /// status they observe. `Err` is reserved for store failures.
    pub async fn run(&self, job_id: &str) -> Result<JobStatus> {
        let job = self.store.get(job_id).await?;
        if job.status != JobStatus::Queued {
            debug!(job_id, status = job.status.as_str(), "job not queued; nothing to do");
            return Ok(job.status);
        }

        let claimed = self
            .store
            .update(
                job_id,
                &JobUpdate::status(JobStatus::Processing),
                UpdateGuard::status_is(JobStatus::Queued),
            )
            .await?;
        if !claimed {
            return Ok(self.store.get(job_id).await?.status);
        }

        info!(
            job_id,
            kind = job.kind.as_str(),
            adapter = self.adapter.name(),
            items = job.items.len(),
            "processing job"
        );
        match job.kind {
            JobKind::Upload => self.process_current_item(job).await,
            JobKind::Youtube => self.process_all_items(job).await,
        }
    }

    async fn process_current_item(&self, mut job: Job) -> Result<JobStatus> {
        let index = job.current_item_index;
        let Some(item) = job.items.get(index).cloned() else {
            return self.fail(&job.id, "no items to process".to_string(), None).await;
        };

        if !self.persist_item_state(&mut job, index, ItemStatus::Processing).await? {
            return Ok(JobStatus::Stopped);
        }

        let result = self
            .adapter
            .produce_artifact(ItemContext {
                job_id: &job.id,
                index,
                item: &item,
            })
            .await;

        let artifact = match result {
            Ok(artifact) => artifact,
            Err(err) => {
                error!(job_id = %job.id, index, "ingest failed: {err}");
                mark_item_failed(&mut job.items[index], err.to_string());
                return self.fail(&job.id, err.to_string(), Some(job.items)).await;
            }
        };
        apply_artifact(&mut job.items[index], &artifact);
        if let ItemOutcome::Unavailable(reason) = &artifact.outcome {
            warn!(job_id = %job.id, index, "item unavailable: {reason}");
            return self.fail(&job.id, reason.clone(), Some(job.items)).await;
        }

        let mut metadata = job.provider_metadata.clone();
        if artifact.external_asset_id.is_some() {
            metadata.external_asset_id = artifact.external_asset_id.clone();
            metadata.external_playback_id = artifact.external_playback_id.clone();
        }
        if metadata.thumbnail.is_none() {
            metadata.thumbnail = artifact.thumbnail.clone();
        }

        let activate = JobUpdate {
            status: Some(JobStatus::Active),
            playback_url: Some(Some(artifact.playback_url.clone())),
            error: Some(None),
            items: Some(job.items.clone()),
            provider_metadata: Some(metadata),
            ..JobUpdate::default()
        };
        if !self
            .store
            .update(&job.id, &activate, UpdateGuard::not_stopped())
            .await?
        {
            info!(job_id = %job.id, "job stopped while ingesting; result discarded");
            return Ok(JobStatus::Stopped);
        }
        info!(job_id = %job.id, index, url = %artifact.playback_url, "job active");

        if artifact.publish_as_secondary {
            let entry = SecondaryStream {
                id: job.id.clone(),
                name: job.name.clone(),
                url: artifact.playback_url.clone(),
                kind: "live".to_string(),
                status: "active".to_string(),
            };
            if let Err(err) = self.store.append_secondary_stream(&job.id, &entry).await {
                warn!(job_id = %job.id, "could not record secondary stream: {err}");
            }
        }

        if let Some(uploads) = &self.uploads {
            uploads.remove(&item.source_ref).await;
        }
        Ok(JobStatus::Active)
    }

    /// Attempts every item once. Per-item failures are recorded and skipped; a
    /// credential failure ends the pass because no later item could succeed.
    async fn process_all_items(&self, mut job: Job) -> Result<JobStatus> {
        if job.items.is_empty() {
            return self.fail(&job.id, "no items to process".to_string(), None).await;
        }

        let mut fatal = None;
        for index in 0..job.items.len() {
            if !self.persist_item_state(&mut job, index, ItemStatus::Processing).await? {
                info!(job_id = %job.id, index, "job stopped; ending pass");
                return Ok(JobStatus::Stopped);
            }

            let item = job.items[index].clone();
            let result = self
                .adapter
                .produce_artifact(ItemContext {
                    job_id: &job.id,
                    index,
                    item: &item,
                })
                .await;
            match result {
                Ok(artifact) => apply_artifact(&mut job.items[index], &artifact),
                Err(err) if err.is_fatal() => {
                    error!(job_id = %job.id, index, "aborting pass: {err}");
                    mark_item_failed(&mut job.items[index], err.to_string());
                    fatal = Some(err);
                    break;
                }
                Err(err) if err.is_item_scoped() => {
                    warn!(job_id = %job.id, index, "item failed: {err}");
                    mark_item_failed(&mut job.items[index], err.to_string());
                }
                Err(err) => {
                    error!(job_id = %job.id, index, "item failed unexpectedly: {err}");
                    mark_item_failed(&mut job.items[index], err.to_string());
                }
            }

            let progress = JobUpdate::default().with_items(job.items.clone());
            if !self
                .store
                .update(&job.id, &progress, UpdateGuard::not_stopped())
                .await?
            {
                info!(job_id = %job.id, index, "job stopped; ending pass");
                return Ok(JobStatus::Stopped);
            }
        }

        if let Some(err) = fatal {
            return self.fail(&job.id, err.to_string(), Some(job.items)).await;
        }

        let ready = job.ready_indices();
        let Some(&first) = ready.first() else {
            let reason = format!("none of the {} items could be ingested", job.items.len());
            return self.fail(&job.id, reason, Some(job.items)).await;
        };

        let activate = JobUpdate {
            status: Some(JobStatus::Active),
            current_item_index: Some(first),
            playback_url: Some(job.items[first].playback_url.clone()),
            error: Some(None),
            items: Some(job.items.clone()),
            ..JobUpdate::default()
        };
        if !self
            .store
            .update(&job.id, &activate, UpdateGuard::not_stopped())
            .await?
        {
            return Ok(JobStatus::Stopped);
        }
        info!(
            job_id = %job.id,
            ready = ready.len(),
            total = job.items.len(),
            "job active"
        );
        Ok(JobStatus::Active)
    }

    /// Records `status` for one item. Returns `false` once the job is stopped.
    async fn persist_item_state(
        &self,
        job: &mut Job,
        index: usize,
        status: ItemStatus,
    ) -> Result<bool> {
        job.items[index].status = status;
        job.items[index].error = None;
        let update = JobUpdate::default().with_items(job.items.clone());
        self.store
            .update(&job.id, &update, UpdateGuard::not_stopped())
            .await
    }

    async fn fail(
        &self,
        job_id: &str,
        reason: String,
        items: Option<Vec<Item>>,
    ) -> Result<JobStatus> {
        let update = JobUpdate {
            items,
            ..JobUpdate::failed(reason)
        };
        if self
            .store
            .update(job_id, &update, UpdateGuard::not_stopped())
            .await?
        {
            Ok(JobStatus::Error)
        } else {
            Ok(JobStatus::Stopped)
        }
    }
}

fn apply_artifact(item: &mut Item, artifact: &Artifact) {
    item.playback_url = Some(artifact.playback_url.clone());
    if artifact.thumbnail.is_some() {
        item.thumbnail = artifact.thumbnail.clone();
    }
    if artifact.external_asset_id.is_some() {
        item.external_asset_id = artifact.external_asset_id.clone();
    }
    if artifact.external_playback_id.is_some() {
        item.external_playback_id = artifact.external_playback_id.clone();
    }
    match &artifact.outcome {
        ItemOutcome::Ready => {
            item.status = ItemStatus::Ready;
            item.error = None;
        }
        ItemOutcome::Unavailable(reason) => mark_item_failed(item, reason.clone()),
    }
}

fn mark_item_failed(item: &mut Item, reason: String) {
    item.status = ItemStatus::Error;
    item.error = Some(reason);
}
