//! Error types shared across the ingestion and query pipelines.
//!
//! Ingestion-path failures surface to the caller as [`RagError`]. Model
//! invocation failures are reported as [`ModelError`] so the conversation
//! engine can pick a fallback message per category.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("Unsupported file type: {0}")]
    UnsupportedDocumentType(String),

    #[error("Failed to load {}: {source}", path.display())]
    Loader {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Vector index error: {0}")]
    Index(String),

    #[error("Failed to persist vector index at {}: {reason}", path.display())]
    IndexPersistence { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Language model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RagError>;

/// Failure reported by a [`ChatModel`](crate::api::ChatModel).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("{0}")]
    Request(String),
}

impl ModelError {
    /// Categorize a raw failure reason by its rate-limit or credential signature.
    pub fn classify(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let lowered = reason.to_lowercase();

        if lowered.contains("rate limit") || lowered.contains("rate_limit") {
            ModelError::RateLimited(reason)
        } else if lowered.contains("api key")
            || lowered.contains("api_key")
            || lowered.contains("unauthorized")
            || lowered.contains("authentication")
        {
            ModelError::Authentication(reason)
        } else {
            ModelError::Request(reason)
        }
    }
}
