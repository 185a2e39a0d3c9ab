#![forbid(unsafe_code)]

use anyhow::{Context, Result, anyhow, bail};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_INGEST_PORT: u16 = 3000;
pub const DEFAULT_INGEST_HOST: &str = "127.0.0.1";
pub const DEFAULT_MUX_API_URL: &str = "https://api.mux.com";
pub const DEFAULT_YOUTUBE_API_URL: &str = "https://www.googleapis.com/youtube/v3";
pub const DEFAULT_HLS_SEGMENT_SECONDS: u32 = 4;

const DATABASE_FILE: &str = "ingest.db";
const UPLOADS_SUBDIR: &str = "uploads";
const STREAMS_SUBDIR: &str = "streams";

/// Which source adapter backs upload jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    LocalTranscode,
    Mux,
    Passthrough,
}

impl ProviderKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" | "ffmpeg" | "transcode" => Some(Self::LocalTranscode),
            "mux" => Some(Self::Mux),
            "passthrough" | "test" | "default" => Some(Self::Passthrough),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LocalTranscode => "local",
            Self::Mux => "mux",
            Self::Passthrough => "passthrough",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MuxSettings {
    pub token_id: String,
    pub token_secret: String,
    pub api_url: String,
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub data_root: PathBuf,
    pub host: String,
    pub port: u16,
    pub public_base_url: String,
    pub provider: ProviderKind,
    pub mux: Option<MuxSettings>,
    pub youtube_api_key: Option<String>,
    pub youtube_api_url: String,
    pub ffmpeg_bin: PathBuf,
    pub yt_dlp_bin: PathBuf,
    pub hls_segment_seconds: u32,
    pub hls_playlist_window: u32,
}

impl RuntimeSettings {
    pub fn database_path(&self) -> PathBuf {
        self.data_root.join(DATABASE_FILE)
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_root.join(UPLOADS_SUBDIR)
    }

    pub fn streams_dir(&self) -> PathBuf {
        self.data_root.join(STREAMS_SUBDIR)
    }

    /// Creates the directories every adapter writes into.
    pub fn prepare_directories(&self) -> Result<()> {
        for dir in [self.data_root.clone(), self.uploads_dir(), self.streams_dir()] {
            fs::create_dir_all(&dir).with_context(|| format!("Creating {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub data_root: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub provider: Option<String>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_settings(overrides: RuntimeOverrides) -> Result<RuntimeSettings> {
    let env_path = overrides
        .env_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(&env_path)?;
    build_runtime_settings(&file_vars, env_var_string, overrides)
}

fn build_runtime_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> Result<RuntimeSettings> {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);

    let data_root = overrides
        .data_root
        .or_else(|| lookup("DATA_ROOT").map(PathBuf::from))
        .ok_or_else(|| anyhow!("DATA_ROOT not set"))?;
    let host = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup("INGEST_HOST"))
        .unwrap_or_else(|| DEFAULT_INGEST_HOST.to_string());
    let port = overrides
        .port
        .or_else(|| lookup("INGEST_PORT").and_then(|value| value.parse::<u16>().ok()))
        .unwrap_or(DEFAULT_INGEST_PORT);
    let public_base_url = lookup("BACKEND_URL")
        .map(|value| value.trim_end_matches('/').to_string())
        .unwrap_or_else(|| format!("http://{host}:{port}"));

    let provider_raw = overrides
        .provider
        .or_else(|| lookup("STREAM_PROVIDER"))
        .unwrap_or_else(|| ProviderKind::LocalTranscode.as_str().to_string());
    let provider = ProviderKind::parse(&provider_raw)
        .ok_or_else(|| anyhow!("unknown STREAM_PROVIDER: {provider_raw}"))?;

    let mux = match (lookup("MUX_TOKEN_ID"), lookup("MUX_TOKEN_SECRET")) {
        (Some(token_id), Some(token_secret)) => Some(MuxSettings {
            token_id,
            token_secret,
            api_url: lookup("MUX_API_URL")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_MUX_API_URL.to_string()),
        }),
        _ => None,
    };
    if provider == ProviderKind::Mux && mux.is_none() {
        bail!("STREAM_PROVIDER=mux requires MUX_TOKEN_ID and MUX_TOKEN_SECRET");
    }

    let hls_segment_seconds = lookup("HLS_SEGMENT_SECONDS")
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_HLS_SEGMENT_SECONDS);
    let hls_playlist_window = lookup("HLS_PLAYLIST_WINDOW")
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(0);

    Ok(RuntimeSettings {
        data_root,
        host,
        port,
        public_base_url,
        provider,
        mux,
        youtube_api_key: lookup("YOUTUBE_API_KEY"),
        youtube_api_url: lookup("YOUTUBE_API_URL")
            .map(|value| value.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_YOUTUBE_API_URL.to_string()),
        ffmpeg_bin: lookup("FFMPEG_BIN")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("ffmpeg")),
        yt_dlp_bin: lookup("YT_DLP_BIN")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("yt-dlp")),
        hls_segment_seconds,
        hls_playlist_window,
    })
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key)
        .or_else(|| file_vars.get(key).cloned())
        .filter(|value| !value.trim().is_empty())
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
