//! Error types for regrag.

use thiserror::Error;

/// Failure at an external provider boundary (embedding or generation service).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Provider call timed out")]
    Timeout,

    #[error("Provider rate limit exceeded")]
    RateLimited,

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl ProviderError {
    /// Whether a retry with backoff may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::RateLimited | Self::Unavailable(_))
    }
}

/// Errors raised by an embedding backend.
pub type EmbeddingError = ProviderError;

/// Errors raised by a text-generation backend.
pub type GenerationError = ProviderError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Build error: {0}")]
    Build(String),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
