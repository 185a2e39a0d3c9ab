#![forbid(unsafe_code)]

use async_trait::async_trait;

use super::{Artifact, ItemContext, SourceAdapter, public_url};
use crate::error::Result;

/// Performs no media work and points every item at the job's conventional
/// stream location. Used for testing and for deployments where something else
/// publishes `<base>/streams/<job>/playlist.m3u8`.
#[derive(Debug, Clone)]
pub struct PassthroughAdapter {
    public_base_url: String,
}

impl PassthroughAdapter {
    pub fn new(public_base_url: String) -> Self {
        Self { public_base_url }
    }
}

#[async_trait]
impl SourceAdapter for PassthroughAdapter {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    async fn produce_artifact(&self, ctx: ItemContext<'_>) -> Result<Artifact> {
        Ok(Artifact::ready(public_url(
            &self.public_base_url,
            &["streams", ctx.job_id, "playlist.m3u8"],
        )))
    }
}
