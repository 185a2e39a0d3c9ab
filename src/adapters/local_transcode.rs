#![forbid(unsafe_code)]

use std::{
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use async_trait::async_trait;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{Artifact, ItemContext, SourceAdapter, public_url};
use crate::error::{Error, Result};

const MANIFEST_FILE: &str = "playlist.m3u8";
const SEGMENT_PATTERN: &str = "segment_%05d.ts";
const STDERR_TAIL_CHARS: usize = 400;

/// Segments a local file into HLS with ffmpeg. Output for item `i` of job `j`
/// lands in `<streams>/<j>/<i>/`, which the static server publishes under
/// `<base>/streams/<j>/<i>/playlist.m3u8`.
#[derive(Debug, Clone)]
pub struct LocalTranscodeAdapter {
    ffmpeg: PathBuf,
    output_root: PathBuf,
    public_base_url: String,
    segment_seconds: u32,
    playlist_window: u32,
}

impl LocalTranscodeAdapter {
    pub fn new(ffmpeg: PathBuf, output_root: PathBuf, public_base_url: String) -> Self {
        Self {
            ffmpeg,
            output_root,
            public_base_url,
            segment_seconds: crate::config::DEFAULT_HLS_SEGMENT_SECONDS,
            playlist_window: 0,
        }
    }

    /// `window == 0` keeps every segment in the manifest.
    pub fn with_segments(mut self, seconds: u32, window: u32) -> Self {
        self.segment_seconds = seconds.max(1);
        self.playlist_window = window;
        self
    }

    fn output_dir(&self, job_id: &str, index: usize) -> PathBuf {
        self.output_root.join(job_id).join(index.to_string())
    }

    fn ffmpeg_args(&self, source: &Path, out_dir: &Path) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            source.to_string_lossy().into_owned(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "veryfast".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-f".to_string(),
            "hls".to_string(),
            "-hls_time".to_string(),
            self.segment_seconds.to_string(),
            "-hls_list_size".to_string(),
            self.playlist_window.to_string(),
        ];
        if self.playlist_window > 0 {
            args.push("-hls_flags".to_string());
            args.push("delete_segments".to_string());
        }
        args.push("-hls_segment_filename".to_string());
        args.push(out_dir.join(SEGMENT_PATTERN).to_string_lossy().into_owned());
        args.push(out_dir.join(MANIFEST_FILE).to_string_lossy().into_owned());
        args
    }
}

#[async_trait]
impl SourceAdapter for LocalTranscodeAdapter {
    fn name(&self) -> &'static str {
        "local-transcode"
    }

    async fn produce_artifact(&self, ctx: ItemContext<'_>) -> Result<Artifact> {
        let source = PathBuf::from(&ctx.item.source_ref);
        if !source.is_file() {
            return Err(Error::SourceUnavailable(format!(
                "{} does not exist",
                source.display()
            )));
        }

        let out_dir = self.output_dir(ctx.job_id, ctx.index);
        tokio::fs::create_dir_all(&out_dir).await?;

        let args = self.ffmpeg_args(&source, &out_dir);
        let ffmpeg = self.ffmpeg.clone();
        debug!(job_id = ctx.job_id, index = ctx.index, ?args, "starting ffmpeg");
        let output = tokio::task::spawn_blocking(move || {
            Command::new(&ffmpeg)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .output()
        })
        .await
        .map_err(|err| Error::Transcode(format!("transcode task failed: {err}")))?;

        let output = match output {
            Ok(output) => output,
            Err(err) => {
                discard_output(&out_dir).await;
                return Err(Error::Transcode(format!(
                    "could not launch {}: {err}",
                    self.ffmpeg.display()
                )));
            }
        };
        if !output.status.success() {
            discard_output(&out_dir).await;
            return Err(Error::Transcode(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr_tail(&output.stderr)
            )));
        }

        let segments = count_segments(&out_dir);
        if !out_dir.join(MANIFEST_FILE).is_file() || segments == 0 {
            discard_output(&out_dir).await;
            return Err(Error::Transcode(format!(
                "ffmpeg finished without a manifest and segments in {}",
                out_dir.display()
            )));
        }

        info!(
            job_id = ctx.job_id,
            index = ctx.index,
            segments,
            "transcoded item to HLS"
        );
        let index = ctx.index.to_string();
        Ok(Artifact::ready(public_url(
            &self.public_base_url,
            &["streams", ctx.job_id, &index, MANIFEST_FILE],
        )))
    }
}

fn count_segments(dir: &Path) -> usize {
    WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "ts"))
        .count()
}

async fn discard_output(dir: &Path) {
    if let Err(err) = tokio::fs::remove_dir_all(dir).await
        && err.kind() != std::io::ErrorKind::NotFound
    {
        warn!(dir = %dir.display(), "could not remove partial transcode output: {err}");
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let skip = text.chars().count().saturating_sub(STDERR_TAIL_CHARS);
    text.chars().skip(skip).collect()
}
