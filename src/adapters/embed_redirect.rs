#![forbid(unsafe_code)]

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use tracing::{info, warn};

use super::{Artifact, ItemContext, SourceAdapter, public_url};
use crate::error::Result;
use crate::youtube::{VideoLookup, is_valid_video_id};

/// Publishes YouTube videos as small HTML documents that embed the official
/// player. Nothing is downloaded. Unplayable videos get an error document
/// instead, so the channel keeps a placeholder for them.
#[derive(Clone)]
pub struct EmbedRedirectAdapter {
    lookup: Arc<dyn VideoLookup>,
    output_root: PathBuf,
    public_base_url: String,
}

impl EmbedRedirectAdapter {
    pub fn new(lookup: Arc<dyn VideoLookup>, output_root: PathBuf, public_base_url: String) -> Self {
        Self {
            lookup,
            output_root,
            public_base_url,
        }
    }

    async fn write_document(&self, job_id: &str, file_name: &str, html: String) -> Result<String> {
        let dir = self.output_root.join(job_id);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(file_name), html).await?;
        Ok(public_url(
            &self.public_base_url,
            &["streams", job_id, file_name],
        ))
    }
}

#[async_trait]
impl SourceAdapter for EmbedRedirectAdapter {
    fn name(&self) -> &'static str {
        "youtube-embed"
    }

    async fn produce_artifact(&self, ctx: ItemContext<'_>) -> Result<Artifact> {
        let video_id = ctx.item.source_ref.trim();
        if !is_valid_video_id(video_id) {
            let url = self
                .write_document(
                    ctx.job_id,
                    &format!("item-{}_error.html", ctx.index),
                    error_document(&ctx.item.name),
                )
                .await?;
            return Ok(Artifact::unavailable(url, "not a valid YouTube video id"));
        }

        let summary = match self.lookup.lookup(video_id).await {
            Ok(summary) => summary,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!(job_id = ctx.job_id, video_id, "video unavailable: {err}");
                let url = self
                    .write_document(
                        ctx.job_id,
                        &format!("{video_id}_error.html"),
                        error_document(&ctx.item.name),
                    )
                    .await?;
                return Ok(Artifact::unavailable(url, err.to_string()));
            }
        };

        let player_file = format!("{video_id}_player.html");
        self.write_document(ctx.job_id, &player_file, player_document(video_id))
            .await?;
        let url = self
            .write_document(
                ctx.job_id,
                &format!("{video_id}_redirect.html"),
                redirect_document(&player_file),
            )
            .await?;
        info!(job_id = ctx.job_id, video_id, "published embed documents");

        Ok(Artifact {
            thumbnail: summary.thumbnail.or_else(|| ctx.item.thumbnail.clone()),
            external_asset_id: Some(video_id.to_string()),
            ..Artifact::ready(url)
        })
    }
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// `player_file` is relative so the pair can be served from any prefix.
fn redirect_document(player_file: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <meta http-equiv="refresh" content="0;url={player_file}">
</head>
<body>
  <p>Redirecting to player...</p>
</body>
</html>
"#
    )
}

fn player_document(video_id: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>YouTube Player</title>
  <style>
    body, html {{ margin: 0; padding: 0; width: 100%; height: 100%; overflow: hidden; background: #000; }}
    iframe {{ width: 100%; height: 100%; border: none; }}
  </style>
</head>
<body>
  <iframe
    src="https://www.youtube.com/embed/{video_id}?autoplay=1&mute=0&controls=1&rel=0"
    allow="accelerometer; autoplay; clipboard-write; encrypted-media; gyroscope; picture-in-picture"
    allowfullscreen>
  </iframe>
</body>
</html>
"#
    )
}

fn error_document(item_name: &str) -> String {
    let name = escape_html(item_name);
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>Video Unavailable</title>
  <style>
    body, html {{ margin: 0; padding: 0; width: 100%; height: 100%; background: #000; color: #fff; font-family: Arial, sans-serif; }}
    .container {{ display: flex; flex-direction: column; align-items: center; justify-content: center; height: 100%; }}
  </style>
</head>
<body>
  <div class="container">
    <h1>Video Unavailable</h1>
    <p>{name} cannot be played right now.</p>
  </div>
</body>
</html>
"#
    )
}
