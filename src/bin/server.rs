#![forbid(unsafe_code)]

//! HTTP front door of the ingest service.
//!
//! Handlers are thin: they decode the request, call into `StreamService` and
//! map library errors onto status codes. Uploaded files are written here, but
//! media is published by the static web server that fronts `DATA_ROOT`.

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, Path as AxumPath, State,
        multipart::{Field, MultipartError},
    },
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use clap::Parser;
use iptv_ingest::{
    Error,
    adapters::{public_url, upload_adapter, youtube_adapter},
    config::{RuntimeOverrides, RuntimeSettings, resolve_runtime_settings},
    jobs::{JobKind, JobStore, NewItem, NewJob, ProviderMetadata},
    logging::init_logging,
    orchestrator::Orchestrator,
    playback::PlaybackSelection,
    security::ensure_not_root,
    service::{JobStatusView, NewSecondaryStream, StreamService},
    uploads::UploadArea,
    youtube::YouTubeDataApi,
};
use serde::{Deserialize, Serialize};
use tokio::{io::AsyncWriteExt, signal};
use tracing::{error, info, warn};

const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;
const UPLOAD_FIELD: &str = "video";

#[derive(Debug, Clone, Parser)]
#[command(name = "server", about = "IPTV ingest API server")]
struct ServerArgs {
    /// Environment file read before the process environment.
    #[arg(long)]
    env_file: Option<PathBuf>,
    /// Directory holding the database, uploads and generated streams.
    #[arg(long)]
    data_root: Option<PathBuf>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    /// Upload provider: local, mux or passthrough.
    #[arg(long)]
    provider: Option<String>,
}

impl ServerArgs {
    fn into_overrides(self) -> RuntimeOverrides {
        RuntimeOverrides {
            data_root: self.data_root,
            host: self.host,
            port: self.port,
            provider: self.provider,
            env_path: self.env_file,
        }
    }
}

#[derive(Clone)]
struct AppState {
    service: StreamService,
    uploads: UploadArea,
    public_base_url: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        // Provider and configuration details stay in the log.
        match &err {
            Error::Validation(_) => Self::bad_request(err.to_string()),
            Error::NotFound(_) => Self::not_found(err.to_string()),
            Error::ProviderRateLimit(_) => {
                warn!("request throttled upstream: {err}");
                Self::new(
                    StatusCode::TOO_MANY_REQUESTS,
                    "upstream provider rate limit reached; try again later",
                )
            }
            Error::ProviderAuth(_) | Error::Configuration(_) => {
                error!("request failed: {err}");
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "upstream provider is unavailable",
                )
            }
            Error::Provider(_) => {
                error!("request failed: {err}");
                Self::new(StatusCode::BAD_GATEWAY, "upstream provider request failed")
            }
            _ => {
                error!("request failed: {err}");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        Self::new(err.status(), err.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, headers, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = ServerArgs::parse();
    init_logging();
    ensure_not_root("server")?;

    let settings = resolve_runtime_settings(args.into_overrides())?;
    settings.prepare_directories()?;
    let uploads = UploadArea::open(&settings.uploads_dir())?;
    let service = build_service(&settings, &uploads).await?;

    let app = router(AppState {
        service: service.clone(),
        uploads,
        public_base_url: settings.public_base_url.clone(),
    });
    let listener = tokio::net::TcpListener::bind((settings.host.as_str(), settings.port))
        .await
        .with_context(|| format!("binding to {}:{}", settings.host, settings.port))?;
    let addr: SocketAddr = listener.local_addr().context("reading listen address")?;
    info!(
        %addr,
        provider = settings.provider.as_str(),
        public_base_url = %settings.public_base_url,
        "ingest server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    info!("waiting for in-flight ingestion to finish");
    service.drain().await;
    Ok(())
}

async fn build_service(settings: &RuntimeSettings, uploads: &UploadArea) -> Result<StreamService> {
    let store = Arc::new(
        JobStore::open(&settings.database_path())
            .await
            .context("opening job store")?,
    );
    let upload_jobs = Orchestrator::new(
        store.clone(),
        upload_adapter(settings, uploads)
            .await
            .context("initializing upload provider")?,
    )
    .with_uploads(uploads.clone());
    let channel_jobs = Orchestrator::new(store.clone(), youtube_adapter(settings));
    info!(
        uploads = upload_jobs.adapter_name(),
        channels = channel_jobs.adapter_name(),
        "ingest adapters ready"
    );

    let mut service =
        StreamService::new(store, upload_jobs, channel_jobs).with_uploads(uploads.clone());
    match &settings.youtube_api_key {
        Some(key) => {
            service = service.with_directory(Arc::new(YouTubeDataApi::new(
                settings.youtube_api_url.clone(),
                key.clone(),
            )));
        }
        None => warn!("YOUTUBE_API_KEY not set; channel jobs are disabled"),
    }
    Ok(service)
}

fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/upload",
            post(upload_video).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/api/stream/start", post(start_stream))
        .route("/api/stream/youtube", post(start_youtube_channel))
        .route("/api/stream/list", get(list_streams))
        .route("/api/stream/stop", post(stop_all_streams))
        .route("/api/stream/stop/{id}", post(stop_stream))
        .route("/api/stream/{id}", delete(delete_stream))
        .route("/api/stream/{id}/status", get(stream_status))
        .route("/api/stream/{id}/streams", post(add_secondary_stream))
        .route("/api/stream/{id}/next", get(next_item))
        .route("/api/stream/{id}/advance", post(advance_stream))
        .fallback(api_fallback)
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        error!("failed to install Ctrl+C handler: {err}");
    }
}

async fn api_fallback() -> ApiError {
    ApiError::not_found("endpoint not found")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartStreamRequest {
    name: String,
    #[serde(default, alias = "videos")]
    items: Vec<NewItem>,
    #[serde(default, rename = "type")]
    kind: Option<JobKind>,
    #[serde(default)]
    shuffle: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YouTubeChannelRequest {
    channel_name: String,
    #[serde(default)]
    video_count: Option<u32>,
    #[serde(default)]
    shuffle: bool,
}

#[derive(Debug, Serialize)]
struct StopResponse {
    success: bool,
    stopped: u64,
}

#[derive(Debug, Serialize)]
struct NextItemResponse {
    item: Option<PlaybackSelection>,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    path: String,
    name: String,
    size: u64,
    url: String,
}

/// Stores the `video` field under a generated name in the uploads directory.
/// The returned `path` is what `startJob` items refer to.
async fn upload_video(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    while let Some(mut field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let name = field.file_name().unwrap_or("upload").to_string();
        let path = state.uploads.new_upload_path(&name);
        let size = match save_field(&mut field, &path).await {
            Ok(size) if size > 0 => size,
            Ok(_) => {
                discard_upload(&path).await;
                return Err(ApiError::bad_request("uploaded file is empty"));
            }
            Err(err) => {
                discard_upload(&path).await;
                return Err(err);
            }
        };

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!(path = %path.display(), size, "stored upload");
        return Ok(Json(UploadResponse {
            url: public_url(&state.public_base_url, &["uploads", &file_name]),
            path: path.to_string_lossy().into_owned(),
            name,
            size,
        }));
    }
    Err(ApiError::bad_request("No file uploaded"))
}

async fn save_field(field: &mut Field<'_>, path: &Path) -> ApiResult<u64> {
    let mut file = tokio::fs::File::create(path).await.map_err(Error::from)?;
    let mut size = 0u64;
    while let Some(chunk) = field.chunk().await? {
        size += chunk.len() as u64;
        file.write_all(&chunk).await.map_err(Error::from)?;
    }
    file.flush().await.map_err(Error::from)?;
    Ok(size)
}

async fn discard_upload(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), "could not discard partial upload: {err}");
    }
}

async fn start_stream(
    State(state): State<AppState>,
    Json(payload): Json<StartStreamRequest>,
) -> ApiResult<(StatusCode, Json<JobStatusView>)> {
    let new_job = NewJob {
        name: payload.name,
        kind: payload.kind.unwrap_or_default(),
        items: payload.items,
        provider_metadata: ProviderMetadata {
            shuffle: payload.shuffle,
            ..ProviderMetadata::default()
        },
    };
    let view = state.service.start_job(new_job).await?;
    Ok((StatusCode::ACCEPTED, Json(view)))
}

async fn start_youtube_channel(
    State(state): State<AppState>,
    Json(payload): Json<YouTubeChannelRequest>,
) -> ApiResult<(StatusCode, Json<JobStatusView>)> {
    let view = state
        .service
        .start_youtube_channel(&payload.channel_name, payload.video_count, payload.shuffle)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(view)))
}

async fn list_streams(State(state): State<AppState>) -> ApiResult<Json<Vec<JobStatusView>>> {
    Ok(Json(state.service.list_active().await?))
}

async fn stop_all_streams(State(state): State<AppState>) -> ApiResult<Json<StopResponse>> {
    let stopped = state.service.stop_job(None).await?;
    Ok(Json(StopResponse {
        success: true,
        stopped,
    }))
}

async fn stop_stream(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<StopResponse>> {
    let stopped = state.service.stop_job(Some(&id)).await?;
    Ok(Json(StopResponse {
        success: true,
        stopped,
    }))
}

async fn stream_status(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<JobStatusView>> {
    Ok(Json(state.service.get_status(&id).await?))
}

async fn add_secondary_stream(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Json(payload): Json<NewSecondaryStream>,
) -> ApiResult<Json<JobStatusView>> {
    Ok(Json(
        state.service.append_secondary_stream(&id, payload).await?,
    ))
}

async fn next_item(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<NextItemResponse>> {
    let item = state.service.next_item(&id).await?;
    Ok(Json(NextItemResponse { item }))
}

async fn advance_stream(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<JobStatusView>> {
    Ok(Json(state.service.queue_next_item(&id).await?))
}

async fn delete_stream(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<StatusCode> {
    state.service.delete_job(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::extract::FromRequest;
    use axum::http::Request;
    use iptv_ingest::adapters::PassthroughAdapter;
    use iptv_ingest::jobs::{ItemStatus, JobStatus};
    use serde_json::Value;
    use tempfile::tempdir;

    struct ServerTestContext {
        _temp: tempfile::TempDir,
        state: AppState,
    }

    impl ServerTestContext {
        async fn new() -> Self {
            let temp = tempdir().unwrap();
            std::fs::create_dir_all(temp.path().join("uploads")).unwrap();
            let uploads = UploadArea::open(&temp.path().join("uploads")).unwrap();
            let store = Arc::new(JobStore::open(&temp.path().join("ingest.db")).await.unwrap());
            let adapter = Arc::new(PassthroughAdapter::new("http://tv.local".into()));
            let service = StreamService::new(
                store.clone(),
                Orchestrator::new(store.clone(), adapter.clone()).with_uploads(uploads.clone()),
                Orchestrator::new(store, adapter),
            )
            .with_uploads(uploads.clone());
            Self {
                _temp: temp,
                state: AppState {
                    service,
                    uploads,
                    public_base_url: "http://tv.local".into(),
                },
            }
        }

        /// Starts an upload job whose sources are fresh files in the uploads
        /// directory.
        async fn start(&self, name: &str, sources: &[&str]) -> JobStatusView {
            for source in sources {
                std::fs::write(self.state.uploads.root().join(source), b"video").unwrap();
            }
            let payload: StartStreamRequest = serde_json::from_value(serde_json::json!({
                "name": name,
                "items": sources
                    .iter()
                    .map(|source| serde_json::json!({ "name": source, "path": source }))
                    .collect::<Vec<_>>(),
            }))
            .unwrap();
            let (status, Json(view)) = start_stream(State(self.state.clone()), Json(payload))
                .await
                .unwrap();
            assert_eq!(status, StatusCode::ACCEPTED);
            view
        }
    }

    async fn error_body(err: ApiError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn args_map_onto_overrides() {
        let args = ServerArgs::try_parse_from([
            "server",
            "--data-root",
            "/srv/iptv",
            "--port",
            "8080",
            "--provider",
            "passthrough",
        ])
        .unwrap();
        let overrides = args.into_overrides();
        assert_eq!(overrides.data_root, Some(PathBuf::from("/srv/iptv")));
        assert_eq!(overrides.port, Some(8080));
        assert_eq!(overrides.provider.as_deref(), Some("passthrough"));
        assert!(overrides.env_path.is_none());

        assert!(ServerArgs::try_parse_from(["server", "--port", "not-a-port"]).is_err());
    }

    #[tokio::test]
    async fn errors_map_to_status_codes() {
        let (status, body) = error_body(Error::validation("name missing").into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation error: name missing");

        let (status, _) = error_body(Error::not_found("job x").into()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = error_body(Error::Transcode("boom".into()).into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let (status, body) =
            error_body(Error::ProviderRateLimit("quotaExceeded for key abc".into()).into()).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert!(!body["error"].as_str().unwrap().contains("abc"));

        for err in [
            Error::ProviderAuth("HTTP 403 keyInvalid secret-key".into()),
            Error::config("YOUTUBE_API_KEY is not configured"),
        ] {
            let (status, body) = error_body(err.into()).await;
            assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
            assert_eq!(body["error"], "upstream provider is unavailable");
        }

        let (status, body) = error_body(Error::Provider("HTTP 500 <html>".into()).into()).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(!body["error"].as_str().unwrap().contains("html"));

        let (status, body) = error_body(api_fallback().await).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "endpoint not found");
    }

    #[tokio::test]
    async fn start_then_status_reports_playback() {
        let ctx = ServerTestContext::new().await;
        let view = ctx.start("Test", &["a.mp4"]).await;
        ctx.state.service.drain().await;

        let Json(status) = stream_status(State(ctx.state.clone()), AxumPath(view.id.clone()))
            .await
            .unwrap();
        assert_eq!(status.status, JobStatus::Active);
        assert_eq!(
            status.playback_url.as_deref(),
            Some(format!("http://tv.local/streams/{}/playlist.m3u8", view.id).as_str())
        );
        assert_eq!(status.items[0].status, ItemStatus::Ready);

        let Json(active) = list_streams(State(ctx.state.clone())).await.unwrap();
        assert_eq!(active.len(), 1);
    }

    #[tokio::test]
    async fn start_rejects_empty_job() {
        let ctx = ServerTestContext::new().await;
        let payload = StartStreamRequest {
            name: "Empty".into(),
            items: Vec::new(),
            kind: None,
            shuffle: false,
        };
        let err = start_stream(State(ctx.state.clone()), Json(payload))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_stream_is_404() {
        let ctx = ServerTestContext::new().await;
        let err = stream_status(State(ctx.state.clone()), AxumPath("ghost".into()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        let err = stop_stream(State(ctx.state.clone()), AxumPath("ghost".into()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stop_and_delete_lifecycle() {
        let ctx = ServerTestContext::new().await;
        let first = ctx.start("One", &["1.mp4"]).await;
        ctx.start("Two", &["2.mp4"]).await;
        ctx.state.service.drain().await;

        let Json(stopped) = stop_stream(State(ctx.state.clone()), AxumPath(first.id.clone()))
            .await
            .unwrap();
        assert!(stopped.success);
        assert_eq!(stopped.stopped, 1);
        let Json(stopped) = stop_all_streams(State(ctx.state.clone())).await.unwrap();
        assert_eq!(stopped.stopped, 1);

        let status = delete_stream(State(ctx.state.clone()), AxumPath(first.id.clone()))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        let err = stream_status(State(ctx.state.clone()), AxumPath(first.id))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn secondary_streams_and_next_item() {
        let ctx = ServerTestContext::new().await;
        let view = ctx.start("Party", &["a.mp4"]).await;
        ctx.state.service.drain().await;

        let payload: NewSecondaryStream = serde_json::from_value(serde_json::json!({
            "name": "Guest",
            "url": "https://cam.example/live.m3u8",
            "type": "camera",
        }))
        .unwrap();
        let Json(updated) = add_secondary_stream(
            State(ctx.state.clone()),
            AxumPath(view.id.clone()),
            Json(payload),
        )
        .await
        .unwrap();
        assert_eq!(updated.secondary_streams.len(), 1);
        assert_eq!(updated.secondary_streams[0].kind, "camera");

        let Json(next) = next_item(State(ctx.state.clone()), AxumPath(view.id.clone()))
            .await
            .unwrap();
        let item = next.item.expect("a playable item");
        assert_eq!(item.index, 0);
        assert_eq!(Some(item.playback_url), updated.playback_url);
    }

    fn multipart_request(field: &str, file_name: &str, contents: &str) -> Request<Body> {
        let body = format!(
            "--BOUNDARY\r\n\
             Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n\
             Content-Type: video/mp4\r\n\r\n\
             {contents}\r\n\
             --BOUNDARY--\r\n"
        );
        Request::builder()
            .method("POST")
            .uri("/api/upload")
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=BOUNDARY")
            .body(Body::from(body))
            .unwrap()
    }

    async fn upload(ctx: &ServerTestContext, request: Request<Body>) -> ApiResult<UploadResponse> {
        let multipart = Multipart::from_request(request, &()).await.unwrap();
        upload_video(State(ctx.state.clone()), multipart)
            .await
            .map(|Json(response)| response)
    }

    #[tokio::test]
    async fn uploaded_files_can_be_streamed() {
        let ctx = ServerTestContext::new().await;
        let uploaded = upload(&ctx, multipart_request("video", "My Clip.mp4", "fake video"))
            .await
            .unwrap();
        assert_eq!(uploaded.name, "My Clip.mp4");
        assert_eq!(uploaded.size, 10);
        let stored = PathBuf::from(&uploaded.path);
        assert_eq!(stored.parent(), Some(ctx.state.uploads.root()));
        assert_eq!(std::fs::read(&stored).unwrap(), b"fake video");
        let file_name = stored.file_name().unwrap().to_string_lossy().into_owned();
        assert!(file_name.ends_with("My_Clip.mp4"));
        assert_eq!(uploaded.url, format!("http://tv.local/uploads/{file_name}"));

        let payload: StartStreamRequest = serde_json::from_value(serde_json::json!({
            "name": "Uploaded",
            "videos": [{ "name": "clip", "path": uploaded.path }],
        }))
        .unwrap();
        let (_, Json(view)) = start_stream(State(ctx.state.clone()), Json(payload))
            .await
            .unwrap();
        ctx.state.service.drain().await;
        let Json(status) = stream_status(State(ctx.state.clone()), AxumPath(view.id))
            .await
            .unwrap();
        assert_eq!(status.status, JobStatus::Active);
        assert!(!stored.exists());
    }

    #[tokio::test]
    async fn upload_requires_a_video_field() {
        let ctx = ServerTestContext::new().await;
        let err = upload(&ctx, multipart_request("poster", "cover.jpg", "jpeg"))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "No file uploaded");

        let err = upload(&ctx, multipart_request("video", "empty.mp4", ""))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(
            std::fs::read_dir(ctx.state.uploads.root()).unwrap().count(),
            0
        );
    }

    #[tokio::test]
    async fn start_rejects_sources_outside_uploads() {
        let ctx = ServerTestContext::new().await;
        let database = ctx._temp.path().join("ingest.db");
        let payload: StartStreamRequest = serde_json::from_value(serde_json::json!({
            "name": "Sneaky",
            "items": [{ "name": "db", "path": database }],
        }))
        .unwrap();
        let err = start_stream(State(ctx.state.clone()), Json(payload))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        ctx.state.service.drain().await;
        assert!(database.is_file());
    }
}
