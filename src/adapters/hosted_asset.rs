#![forbid(unsafe_code)]

use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{Artifact, ItemContext, SourceAdapter, public_url};
use crate::config::MuxSettings;
use crate::error::{Error, Result};
use crate::uploads::{UploadArea, is_remote};

const STREAM_DOMAIN: &str = "https://stream.mux.com";
const IMAGE_DOMAIN: &str = "https://image.mux.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_MAX_POLLS: u32 = 150;

#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackId {
    pub id: String,
    #[serde(default)]
    pub policy: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MuxAsset {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub playback_ids: Vec<PlaybackId>,
    #[serde(default)]
    pub errors: Option<Value>,
}

impl MuxAsset {
    pub fn public_playback_id(&self) -> Option<&str> {
        self.playback_ids
            .iter()
            .find(|playback| playback.policy == "public")
            .or_else(|| self.playback_ids.first())
            .map(|playback| playback.id.as_str())
    }
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

/// Minimal blocking client for the Mux Video API. Calls are moved onto the
/// blocking pool by the async wrappers.
#[derive(Clone)]
pub struct MuxClient {
    agent: ureq::Agent,
    api_url: String,
    authorization: String,
}

impl std::fmt::Debug for MuxClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MuxClient")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

impl MuxClient {
    pub fn new(settings: &MuxSettings) -> Self {
        let credentials = format!("{}:{}", settings.token_id, settings.token_secret);
        Self {
            agent: ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build(),
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            authorization: format!("Basic {}", STANDARD.encode(credentials)),
        }
    }

    pub async fn create_asset(&self, input_url: &str) -> Result<MuxAsset> {
        let body = json!({
            "input": input_url,
            "playback_policy": ["public"],
        });
        let client = self.clone();
        blocking(move || client.send::<MuxAsset>("POST", "/video/v1/assets", &[], Some(body))).await
    }

    pub async fn get_asset(&self, asset_id: &str) -> Result<MuxAsset> {
        let client = self.clone();
        let path = format!("/video/v1/assets/{asset_id}");
        blocking(move || client.send::<MuxAsset>("GET", &path, &[], None)).await
    }

    pub async fn list_assets(&self, limit: u32) -> Result<Vec<MuxAsset>> {
        let client = self.clone();
        let limit = limit.to_string();
        blocking(move || {
            client.send::<Vec<MuxAsset>>(
                "GET",
                "/video/v1/assets",
                &[("limit", limit.as_str())],
                None,
            )
        })
        .await
    }

    fn send<T: DeserializeOwned>(
        &self,
        method: &str,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<T> {
        let url = format!("{}{}", self.api_url, path);
        let mut request = self
            .agent
            .request(method, &url)
            .set("Authorization", &self.authorization);
        for (key, value) in query {
            request = request.query(key, value);
        }
        let response = match body {
            Some(body) => request.send_json(body),
            None => request.call(),
        }
        .map_err(|err| map_ureq_error(err, &format!("{method} {path}")))?;

        let envelope: Envelope<T> = response
            .into_json()
            .map_err(|err| Error::Provider(format!("invalid response from {path}: {err}")))?;
        Ok(envelope.data)
    }
}

async fn blocking<T, F>(call: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|err| Error::Provider(format!("provider request task failed: {err}")))?
}

fn map_ureq_error(err: ureq::Error, context: &str) -> Error {
    match err {
        ureq::Error::Status(status @ (401 | 403), response) => Error::ProviderAuth(format!(
            "{context}: HTTP {status} {}",
            response.into_string().unwrap_or_default()
        )),
        ureq::Error::Status(429, _) => {
            Error::ProviderRateLimit(format!("{context}: HTTP 429"))
        }
        ureq::Error::Status(status, response) => Error::Provider(format!(
            "{context}: HTTP {status} {}",
            response.into_string().unwrap_or_default()
        )),
        ureq::Error::Transport(transport) => Error::Provider(format!("{context}: {transport}")),
    }
}

/// Hands uploads to Mux and waits until the resulting asset can be played.
#[derive(Debug, Clone)]
pub struct HostedAssetAdapter {
    client: MuxClient,
    public_base_url: String,
    uploads: Option<UploadArea>,
    poll_interval: Duration,
    max_polls: u32,
}

impl HostedAssetAdapter {
    pub fn new(client: MuxClient, public_base_url: String) -> Self {
        Self {
            client,
            public_base_url,
            uploads: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
        }
    }

    /// Local sources are only accepted from `uploads`, which the static web
    /// server publishes under `/uploads`.
    pub fn with_uploads(mut self, uploads: UploadArea) -> Self {
        self.uploads = Some(uploads);
        self
    }

    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    /// Lists a single asset to prove the configured credentials work.
    pub async fn verify_credentials(&self) -> Result<()> {
        let assets = self.client.list_assets(1).await?;
        debug!(visible_assets = assets.len(), "Mux credentials accepted");
        Ok(())
    }

    /// The provider fetches the input itself, so local uploads are referenced
    /// through the public uploads route.
    async fn input_url(&self, source_ref: &str) -> Result<String> {
        if is_remote(source_ref) {
            return Ok(source_ref.to_string());
        }
        let uploads = self.uploads.as_ref().ok_or_else(|| {
            Error::SourceUnavailable(format!("{source_ref} is not a URL"))
        })?;
        let path = uploads
            .confine(source_ref)
            .await
            .map_err(|err| Error::SourceUnavailable(err.to_string()))?;
        let segments = uploads.public_segments(&path).ok_or_else(|| {
            Error::SourceUnavailable(format!("{source_ref} has no file name"))
        })?;
        let mut route = vec!["uploads"];
        route.extend(segments.iter().map(String::as_str));
        Ok(public_url(&self.public_base_url, &route))
    }
}

#[async_trait]
impl SourceAdapter for HostedAssetAdapter {
    fn name(&self) -> &'static str {
        "mux"
    }

    async fn produce_artifact(&self, ctx: ItemContext<'_>) -> Result<Artifact> {
        let input = self.input_url(&ctx.item.source_ref).await?;
        let mut asset = self.client.create_asset(&input).await?;
        info!(job_id = ctx.job_id, asset_id = %asset.id, "created Mux asset");

        let mut polls = 0;
        loop {
            match asset.status.as_str() {
                "ready" => break,
                "errored" => {
                    return Err(Error::Provider(format!(
                        "asset {} errored: {}",
                        asset.id,
                        asset.errors.clone().unwrap_or(Value::Null)
                    )));
                }
                _ => {}
            }
            if polls >= self.max_polls {
                return Err(Error::Provider(format!(
                    "asset {} still {} after {polls} checks",
                    asset.id, asset.status
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
            asset = self.client.get_asset(&asset.id).await?;
            polls += 1;
        }

        let playback_id = asset
            .public_playback_id()
            .ok_or_else(|| Error::Provider(format!("asset {} has no playback id", asset.id)))?
            .to_string();
        Ok(Artifact {
            playback_url: format!("{STREAM_DOMAIN}/{playback_id}.m3u8"),
            thumbnail: Some(format!("{IMAGE_DOMAIN}/{playback_id}/thumbnail.jpg")),
            external_asset_id: Some(asset.id),
            external_playback_id: Some(playback_id),
            publish_as_secondary: true,
            ..Artifact::ready(String::new())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::test_support::spawn_mock;
    use crate::jobs::Item;
    use axum::{
        Json, Router,
        extract::{Path as AxumPath, State},
        http::{HeaderMap, StatusCode},
        routing::{get, post},
    };
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };
    use tempfile::tempdir;

    #[derive(Clone, Default)]
    struct MockMux {
        polls: Arc<AtomicUsize>,
        inputs: Arc<parking_lot::Mutex<Vec<String>>>,
    }

    fn authorized(headers: &HeaderMap) -> bool {
        let expected = format!("Basic {}", STANDARD.encode("id:secret"));
        headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            == Some(expected.as_str())
    }

    async fn create(
        State(mock): State<MockMux>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        if !authorized(&headers) {
            return (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized"})));
        }
        mock.inputs
            .lock()
            .push(body["input"].as_str().unwrap_or_default().to_string());
        (
            StatusCode::CREATED,
            Json(json!({"data": {
                "id": "asset-1",
                "status": "preparing",
                "playback_ids": [{"id": "pb-1", "policy": "public"}],
            }})),
        )
    }

    async fn fetch(
        State(mock): State<MockMux>,
        AxumPath(id): AxumPath<String>,
    ) -> Json<Value> {
        let seen = mock.polls.fetch_add(1, Ordering::SeqCst);
        let status = if seen == 0 { "preparing" } else { "ready" };
        Json(json!({"data": {
            "id": id,
            "status": status,
            "playback_ids": [{"id": "pb-1", "policy": "public"}],
        }}))
    }

    async fn list(headers: HeaderMap) -> (StatusCode, Json<Value>) {
        if !authorized(&headers) {
            return (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized"})));
        }
        (StatusCode::OK, Json(json!({"data": []})))
    }

    async fn mock_server(mock: MockMux) -> String {
        let router = Router::new()
            .route("/video/v1/assets", post(create).get(list))
            .route("/video/v1/assets/{id}", get(fetch))
            .with_state(mock);
        spawn_mock(router).await
    }

    fn adapter_for(api_url: &str, secret: &str) -> HostedAssetAdapter {
        let client = MuxClient::new(&MuxSettings {
            token_id: "id".into(),
            token_secret: secret.into(),
            api_url: api_url.into(),
        });
        HostedAssetAdapter::new(client, "https://tv.example".into())
            .with_polling(Duration::from_millis(5), 10)
    }

    #[tokio::test]
    async fn uploads_are_published_through_mux() {
        let mock = MockMux::default();
        let api = mock_server(mock.clone()).await;
        let dir = tempdir().unwrap();
        let root = dir.path().join("uploads");
        std::fs::create_dir_all(root.join("2024")).unwrap();
        let uploads = UploadArea::open(&root).unwrap();
        let source = uploads.root().join("2024/holiday.mp4");
        std::fs::write(&source, b"video").unwrap();
        let item = Item::new("Holiday", source.to_string_lossy());

        let artifact = adapter_for(&api, "secret")
            .with_uploads(uploads)
            .produce_artifact(ItemContext {
                job_id: "job1",
                index: 0,
                item: &item,
            })
            .await
            .unwrap();

        assert_eq!(artifact.playback_url, "https://stream.mux.com/pb-1.m3u8");
        assert_eq!(
            artifact.thumbnail.as_deref(),
            Some("https://image.mux.com/pb-1/thumbnail.jpg")
        );
        assert_eq!(artifact.external_asset_id.as_deref(), Some("asset-1"));
        assert!(artifact.publish_as_secondary);
        assert_eq!(
            mock.inputs.lock().clone(),
            vec!["https://tv.example/uploads/2024/holiday.mp4".to_string()]
        );
        assert!(mock.polls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn rejected_credentials_are_fatal() {
        let api = mock_server(MockMux::default()).await;
        let adapter = adapter_for(&api, "wrong");

        let err = adapter.verify_credentials().await.unwrap_err();
        assert!(err.is_fatal(), "unexpected error {err:?}");

        let item = Item::new("Remote", "https://media.example/clip.mp4");
        let err = adapter
            .produce_artifact(ItemContext {
                job_id: "job1",
                index: 0,
                item: &item,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProviderAuth(_)));
    }

    #[tokio::test]
    async fn verify_credentials_accepts_valid_tokens() {
        let api = mock_server(MockMux::default()).await;
        adapter_for(&api, "secret").verify_credentials().await.unwrap();
    }

    #[tokio::test]
    async fn missing_upload_is_unavailable() {
        let adapter = adapter_for("http://127.0.0.1:9", "secret");
        let item = Item::new("Ghost", "/nowhere/ghost.mp4");
        let err = adapter
            .produce_artifact(ItemContext {
                job_id: "job1",
                index: 0,
                item: &item,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable(_)));
    }

    #[tokio::test]
    async fn local_files_outside_uploads_never_reach_mux() {
        let mock = MockMux::default();
        let api = mock_server(mock.clone()).await;
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("uploads")).unwrap();
        let uploads = UploadArea::open(&dir.path().join("uploads")).unwrap();
        let private = dir.path().join("private.mp4");
        std::fs::write(&private, b"video").unwrap();
        let item = Item::new("Private", private.to_string_lossy());

        for adapter in [
            adapter_for(&api, "secret").with_uploads(uploads),
            adapter_for(&api, "secret"),
        ] {
            let err = adapter
                .produce_artifact(ItemContext {
                    job_id: "job1",
                    index: 0,
                    item: &item,
                })
                .await
                .unwrap_err();
            assert!(matches!(err, Error::SourceUnavailable(_)), "{err:?}");
        }
        assert!(mock.inputs.lock().is_empty());
    }

    #[test]
    fn public_playback_id_prefers_public_policy() {
        let asset: MuxAsset = serde_json::from_value(json!({
            "id": "a",
            "status": "ready",
            "playback_ids": [
                {"id": "signed-1", "policy": "signed"},
                {"id": "public-1", "policy": "public"},
            ],
        }))
        .unwrap();
        assert_eq!(asset.public_playback_id(), Some("public-1"));
    }
}
