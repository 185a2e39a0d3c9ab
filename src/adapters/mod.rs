#![forbid(unsafe_code)]

//! Source adapters turn one job item into something a player can open.
//!
//! Every variant implements [`SourceAdapter`]; the orchestrator receives one
//! as a trait object at construction time and never branches on the provider.

mod embed_redirect;
mod hosted_asset;
mod local_transcode;
mod passthrough;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{ProviderKind, RuntimeSettings};
use crate::error::{Error, Result};
use crate::jobs::Item;
use crate::uploads::UploadArea;
use crate::youtube::YtDlpLookup;

pub use embed_redirect::EmbedRedirectAdapter;
pub use hosted_asset::{HostedAssetAdapter, MuxAsset, MuxClient};
pub use local_transcode::LocalTranscodeAdapter;
pub use passthrough::PassthroughAdapter;

/// The item an adapter is asked to process, with its position in the job.
#[derive(Debug, Clone, Copy)]
pub struct ItemContext<'a> {
    pub job_id: &'a str,
    pub index: usize,
    pub item: &'a Item,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Ready,
    /// The adapter produced a fallback document but the source itself could
    /// not be used. This is an expected condition, not an adapter failure.
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub playback_url: String,
    pub thumbnail: Option<String>,
    pub external_asset_id: Option<String>,
    pub external_playback_id: Option<String>,
    pub outcome: ItemOutcome,
    /// Attach the artifact to the job's secondary streams once it is active.
    pub publish_as_secondary: bool,
}

impl Artifact {
    pub fn ready(playback_url: impl Into<String>) -> Self {
        Self {
            playback_url: playback_url.into(),
            thumbnail: None,
            external_asset_id: None,
            external_playback_id: None,
            outcome: ItemOutcome::Ready,
            publish_as_secondary: false,
        }
    }

    pub fn unavailable(playback_url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            outcome: ItemOutcome::Unavailable(reason.into()),
            ..Self::ready(playback_url)
        }
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &'static str;

    /// Produces the playable artifact for one item. Per-item problems come back
    /// as `SourceUnavailable`, `Transcode`, `Provider` or `ProviderRateLimit`;
    /// `ProviderAuth` means no further item can succeed either.
    async fn produce_artifact(&self, ctx: ItemContext<'_>) -> Result<Artifact>;
}

/// Builds the adapter backing upload jobs from `STREAM_PROVIDER`. The hosted
/// provider's credentials are checked here so a bad token stops startup.
pub async fn upload_adapter(
    settings: &RuntimeSettings,
    uploads: &UploadArea,
) -> Result<Arc<dyn SourceAdapter>> {
    match settings.provider {
        ProviderKind::LocalTranscode => Ok(Arc::new(
            LocalTranscodeAdapter::new(
                settings.ffmpeg_bin.clone(),
                settings.streams_dir(),
                settings.public_base_url.clone(),
            )
            .with_segments(settings.hls_segment_seconds, settings.hls_playlist_window),
        )),
        ProviderKind::Mux => {
            let mux = settings
                .mux
                .as_ref()
                .ok_or_else(|| Error::config("Mux credentials are missing"))?;
            let adapter =
                HostedAssetAdapter::new(MuxClient::new(mux), settings.public_base_url.clone())
                    .with_uploads(uploads.clone());
            adapter.verify_credentials().await?;
            Ok(Arc::new(adapter))
        }
        ProviderKind::Passthrough => Ok(Arc::new(PassthroughAdapter::new(
            settings.public_base_url.clone(),
        ))),
    }
}

/// Builds the adapter backing YouTube channel jobs.
pub fn youtube_adapter(settings: &RuntimeSettings) -> Arc<dyn SourceAdapter> {
    Arc::new(EmbedRedirectAdapter::new(
        Arc::new(YtDlpLookup::new(settings.yt_dlp_bin.clone())),
        settings.streams_dir(),
        settings.public_base_url.clone(),
    ))
}

/// Joins a public base URL and path segments with single slashes.
pub fn public_url(base: &str, segments: &[&str]) -> String {
    let mut url = base.trim_end_matches('/').to_string();
    for segment in segments {
        url.push('/');
        url.push_str(segment.trim_matches('/'));
    }
    url
}
