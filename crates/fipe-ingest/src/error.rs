//! Error types for catalog ingestion

use fipe_common::FipeError;
use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Errors that end a brand pipeline (or the whole run)
///
/// Transient network failures never show up here directly: the fetcher
/// absorbs them and only reports [`IngestError::FetchExhausted`] once every
/// attempt has failed.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("All {attempts} attempts to request {url} failed")]
    FetchExhausted { url: String, attempts: u32 },

    #[error("Malformed response: {0}")]
    MalformedResponse(#[from] FipeError),

    #[error("Failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Export of chunk {chunk} failed for tables {tables:?}")]
    Export { chunk: usize, tables: Vec<String> },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Pipeline cancelled")]
    Cancelled,

    #[error("Pipeline for brand {brand} exceeded {secs}s")]
    Timeout { brand: String, secs: u64 },

    #[error("Pipeline task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl IngestError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// True for the error a stage reports after a sibling already failed
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
