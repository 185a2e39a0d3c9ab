#![forbid(unsafe_code)]

//! Chooses the next playable item of an active job.

use std::sync::Arc;

use rand::Rng;
use rand::seq::IndexedRandom;
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::jobs::{ItemStatus, Job, JobStatus, JobStore, JobUpdate, UpdateGuard};

const MAX_ADVANCE_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSelection {
    pub index: usize,
    pub name: String,
    pub playback_url: String,
    pub thumbnail: Option<String>,
}

impl PlaybackSelection {
    fn from_job(job: &Job, index: usize) -> Option<Self> {
        let item = job.items.get(index)?;
        Some(Self {
            index,
            name: item.name.clone(),
            playback_url: item.playback_url.clone()?,
            thumbnail: item.thumbnail.clone(),
        })
    }
}

/// First ready item after the current one, wrapping around. The current item
/// is only chosen again when it is the sole ready item.
pub fn next_sequential(job: &Job) -> Option<usize> {
    let len = job.items.len();
    (1..=len)
        .map(|offset| (job.current_item_index + offset) % len)
        .find(|&index| is_playable(job, index))
}

/// Uniform pick among ready items. Never changes the current index.
pub fn pick_shuffled<R: Rng + ?Sized>(job: &Job, rng: &mut R) -> Option<usize> {
    let ready: Vec<usize> = job
        .ready_indices()
        .into_iter()
        .filter(|&index| is_playable(job, index))
        .collect();
    ready.choose(rng).copied()
}

fn current_selection(job: &Job) -> Option<PlaybackSelection> {
    is_playable(job, job.current_item_index)
        .then(|| PlaybackSelection::from_job(job, job.current_item_index))
        .flatten()
}

fn is_playable(job: &Job, index: usize) -> bool {
    job.items
        .get(index)
        .is_some_and(|item| item.status == ItemStatus::Ready && item.playback_url.is_some())
}

#[derive(Debug, Clone)]
pub struct PlaybackResolver {
    store: Arc<JobStore>,
}

impl PlaybackResolver {
    pub fn new(store: Arc<JobStore>) -> Self {
        Self { store }
    }

    /// Returns the item to play next, or `None` when nothing is playable.
    /// Sequential jobs also advance `currentItemIndex`; the write is guarded on
    /// the index it was computed from and retried when another caller moved it.
    ///
    /// Only `active` jobs advance. While a job is being (re)ingested its index
    /// belongs to the orchestrator, so callers keep getting the current item.
    pub async fn next(&self, job_id: &str) -> Result<Option<PlaybackSelection>> {
        for _ in 0..MAX_ADVANCE_ATTEMPTS {
            let job = self.store.get(job_id).await?;
            match job.status {
                JobStatus::Stopped => return Ok(None),
                JobStatus::Active => {}
                _ => return Ok(current_selection(&job)),
            }

            if job.provider_metadata.shuffle {
                let picked = {
                    let mut rng = rand::rng();
                    pick_shuffled(&job, &mut rng)
                };
                return Ok(picked.and_then(|index| PlaybackSelection::from_job(&job, index)));
            }

            let Some(index) = next_sequential(&job) else {
                return Ok(None);
            };
            let Some(selection) = PlaybackSelection::from_job(&job, index) else {
                return Ok(None);
            };
            let advance = JobUpdate {
                current_item_index: Some(index),
                playback_url: Some(Some(selection.playback_url.clone())),
                ..JobUpdate::default()
            };
            let guard = UpdateGuard {
                status_is: Some(JobStatus::Active),
                current_item_index_is: Some(job.current_item_index),
                ..UpdateGuard::NONE
            };
            if self.store.update(job_id, &advance, guard).await? {
                debug!(job_id, index, "advanced playback");
                return Ok(Some(selection));
            }
        }
        Err(Error::validation(format!(
            "playback position of job {job_id} is changing too quickly; retry"
        )))
    }
}
