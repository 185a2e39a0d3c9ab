#![forbid(unsafe_code)]

//! YouTube lookups: per-video availability through yt-dlp and channel
//! discovery through the Data API.

use std::{path::PathBuf, process::Command, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};

const VIDEO_ID_LEN: usize = 11;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
pub const MAX_CHANNEL_VIDEOS: u32 = 50;
pub const DEFAULT_CHANNEL_VIDEOS: u32 = 10;

/// Whether `value` has the shape of a YouTube video id.
pub fn is_valid_video_id(value: &str) -> bool {
    value.len() == VIDEO_ID_LEN
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
}

pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoSummary {
    pub id: String,
    pub title: Option<String>,
    pub thumbnail: Option<String>,
}

/// Resolves a single video, failing with `SourceUnavailable` when it cannot be
/// played (removed, private, region locked).
#[async_trait]
pub trait VideoLookup: Send + Sync {
    async fn lookup(&self, video_id: &str) -> Result<VideoSummary>;
}

#[derive(Debug, Deserialize)]
struct MinimalInfo {
    id: Option<String>,
    title: Option<String>,
    thumbnail: Option<String>,
}

/// Asks yt-dlp for a video's metadata without downloading anything.
#[derive(Debug, Clone)]
pub struct YtDlpLookup {
    binary: PathBuf,
}

impl YtDlpLookup {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }
}

#[async_trait]
impl VideoLookup for YtDlpLookup {
    async fn lookup(&self, video_id: &str) -> Result<VideoSummary> {
        let url = watch_url(video_id);
        let binary = self.binary.clone();
        let url_for_run = url.clone();
        let output = tokio::task::spawn_blocking(move || {
            Command::new(&binary)
                .arg("--dump-single-json")
                .arg("--skip-download")
                .arg("--no-warnings")
                .arg("--no-progress")
                .arg(&url_for_run)
                .output()
        })
        .await
        .map_err(|err| Error::SourceUnavailable(format!("lookup task failed: {err}")))?
        .map_err(|err| {
            Error::SourceUnavailable(format!("could not run {}: {err}", self.binary.display()))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(video_id, stderr = %stderr.trim(), "yt-dlp rejected video");
            return Err(Error::SourceUnavailable(format!(
                "metadata lookup failed for {url} (status {})",
                output.status
            )));
        }

        let info: MinimalInfo = serde_json::from_slice(&output.stdout).map_err(|err| {
            Error::SourceUnavailable(format!("unreadable metadata for {url}: {err}"))
        })?;
        Ok(VideoSummary {
            id: info.id.unwrap_or_else(|| video_id.to_string()),
            title: info.title,
            thumbnail: info.thumbnail,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelVideo {
    pub id: String,
    pub title: String,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelListing {
    pub channel_id: String,
    pub title: String,
    pub thumbnail: Option<String>,
    pub videos: Vec<ChannelVideo>,
}

/// Finds a channel by name and lists its most recent uploads.
#[async_trait]
pub trait ChannelDirectory: Send + Sync {
    async fn find_channel(&self, name: &str, count: u32) -> Result<ChannelListing>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItem {
    id: SearchId,
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchId {
    channel_id: Option<String>,
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    high: Option<Thumbnail>,
    medium: Option<Thumbnail>,
    default: Option<Thumbnail>,
}

impl Thumbnails {
    fn best(&self) -> Option<String> {
        [&self.high, &self.medium, &self.default]
            .into_iter()
            .flatten()
            .map(|thumb| thumb.url.clone())
            .next()
    }
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

/// YouTube Data API v3 client.
#[derive(Clone)]
pub struct YouTubeDataApi {
    agent: ureq::Agent,
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for YouTubeDataApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YouTubeDataApi")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl YouTubeDataApi {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn search(&self, query: &[(&str, &str)]) -> Result<SearchResponse> {
        let mut request = self
            .agent
            .get(&format!("{}/search", self.base_url))
            .query("part", "snippet")
            .query("key", &self.api_key);
        for (key, value) in query {
            request = request.query(key, value);
        }
        request
            .call()
            .map_err(map_api_error)?
            .into_json()
            .map_err(|err| Error::Provider(format!("invalid YouTube search response: {err}")))
    }

    fn find_channel_blocking(&self, name: &str, count: u32) -> Result<ChannelListing> {
        let channels = self.search(&[("q", name), ("type", "channel"), ("maxResults", "1")])?;
        let Some((channel_id, channel)) = channels
            .items
            .into_iter()
            .find_map(|item| item.id.channel_id.clone().map(|id| (id, item)))
        else {
            return Err(Error::not_found(format!("YouTube channel {name:?}")));
        };

        let max_results = count.clamp(1, MAX_CHANNEL_VIDEOS).to_string();
        let uploads = self.search(&[
            ("channelId", channel_id.as_str()),
            ("order", "date"),
            ("type", "video"),
            ("maxResults", max_results.as_str()),
        ])?;
        let videos = uploads
            .items
            .into_iter()
            .filter_map(|item| {
                let id = item.id.video_id?;
                Some(ChannelVideo {
                    id,
                    title: item.snippet.title,
                    thumbnail: item.snippet.thumbnails.best(),
                })
            })
            .collect();

        Ok(ChannelListing {
            channel_id,
            title: channel.snippet.title,
            thumbnail: channel.snippet.thumbnails.best(),
            videos,
        })
    }
}

#[async_trait]
impl ChannelDirectory for YouTubeDataApi {
    async fn find_channel(&self, name: &str, count: u32) -> Result<ChannelListing> {
        let api = self.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || api.find_channel_blocking(&name, count))
            .await
            .map_err(|err| Error::Provider(format!("YouTube request task failed: {err}")))?
    }
}

/// Quota exhaustion comes back as 403 with a `quotaExceeded` reason; every
/// other 400/401/403 means the key itself is unusable.
fn map_api_error(err: ureq::Error) -> Error {
    match err {
        ureq::Error::Status(status, response) => {
            let body = response.into_string().unwrap_or_default();
            match status {
                429 => Error::ProviderRateLimit(body),
                403 if body.contains("quotaExceeded") || body.contains("rateLimitExceeded") => {
                    Error::ProviderRateLimit(body)
                }
                401 | 403 => Error::ProviderAuth(body),
                400 if body.contains("keyInvalid") || body.contains("API key") => {
                    Error::ProviderAuth(body)
                }
                _ => {
                    warn!(status, "YouTube API request failed");
                    Error::Provider(format!("YouTube API returned HTTP {status}: {body}"))
                }
            }
        }
        ureq::Error::Transport(transport) => Error::Provider(transport.to_string()),
    }
}
