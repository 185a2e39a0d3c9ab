#![forbid(unsafe_code)]

//! Error taxonomy shared by the store, the adapters and the orchestrator.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    /// Credentials were rejected by a third-party provider. Never retried per job.
    #[error("provider rejected credentials: {0}")]
    ProviderAuth(String),

    #[error("provider rate limit reached: {0}")]
    ProviderRateLimit(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("transcode failed: {0}")]
    Transcode(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("database error: {0}")]
    Database(#[from] libsql::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Errors that abort a whole job (and the provider-backed path at startup).
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ProviderAuth(_))
    }

    /// Errors that only concern the item being ingested.
    pub fn is_item_scoped(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable(_)
                | Self::Transcode(_)
                | Self::Provider(_)
                | Self::ProviderRateLimit(_)
        )
    }
}
