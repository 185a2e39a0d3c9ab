#![forbid(unsafe_code)]

//! The uploads directory: the only place local upload sources may live.
//!
//! Clients name sources by path, so every local reference is canonicalized
//! and checked against the directory root before it is read or removed.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// `true` for sources the provider fetches itself.
pub fn is_remote(source_ref: &str) -> bool {
    source_ref.starts_with("http://") || source_ref.starts_with("https://")
}

#[derive(Debug, Clone)]
pub struct UploadArea {
    root: PathBuf,
}

impl UploadArea {
    /// Opens an existing uploads directory.
    pub fn open(root: &Path) -> Result<Self> {
        let root = std::fs::canonicalize(root).map_err(|err| {
            Error::config(format!("uploads directory {}: {err}", root.display()))
        })?;
        if !root.is_dir() {
            return Err(Error::config(format!(
                "uploads directory {} is not a directory",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a local source to a regular file inside the uploads directory.
    /// Relative references are taken relative to the directory itself.
    pub async fn confine(&self, source_ref: &str) -> Result<PathBuf> {
        let rejected = || Error::validation(format!("{source_ref} is not an uploaded file"));
        let candidate = Path::new(source_ref);
        let candidate = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };
        let resolved = tokio::fs::canonicalize(&candidate)
            .await
            .map_err(|_| rejected())?;
        if !resolved.starts_with(&self.root) {
            return Err(rejected());
        }
        let metadata = tokio::fs::metadata(&resolved)
            .await
            .map_err(|_| rejected())?;
        if !metadata.is_file() {
            return Err(rejected());
        }
        Ok(resolved)
    }

    /// Path segments of a confined file below the uploads directory, as the
    /// static web server publishes them.
    pub fn public_segments(&self, path: &Path) -> Option<Vec<String>> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let segments: Vec<String> = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy().into_owned())
            .collect();
        (!segments.is_empty()).then_some(segments)
    }

    /// A fresh path for a new upload. Only a sanitized copy of the client's
    /// file name is kept, behind a unique prefix.
    pub fn new_upload_path(&self, original_name: &str) -> PathBuf {
        let base = Path::new(original_name)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let cleaned: String = base
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let cleaned = cleaned.trim_start_matches('.');
        let name = if cleaned.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            format!("{}-{cleaned}", uuid::Uuid::new_v4())
        };
        self.root.join(name)
    }

    /// Deletes a consumed upload. References outside the directory are
    /// never touched.
    pub async fn remove(&self, source_ref: &str) {
        if is_remote(source_ref) {
            return;
        }
        let path = match self.confine(source_ref).await {
            Ok(path) => path,
            Err(err) => {
                debug!(source_ref, "not removing source: {err}");
                return;
            }
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "removed ingested upload"),
            Err(err) => warn!(path = %path.display(), "could not remove ingested upload: {err}"),
        }
    }
}
