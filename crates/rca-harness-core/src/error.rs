//! Error taxonomy for the indexing and conversation pipelines.
//!
//! Per-document errors ([`ExtractError`], [`EmbeddingError`]) are recovered
//! by the indexer. Per-turn retrieval and classification failures degrade
//! to empty evidence or the default intent. Only [`SyncError::InProgress`]
//! and [`GenerationError`] reach callers as explicit signals.

use thiserror::Error;

/// Failure turning raw document bytes into text.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),
    #[error("{format} extraction failed: {message}")]
    Corrupt {
        format: &'static str,
        message: String,
    },
}

/// Failure reported by a remote model provider.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },
    #[error("request rejected {status}: {message}")]
    Client { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("provider is disabled")]
    Disabled,
}

impl ProviderError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_)
                | ProviderError::Timeout(_)
                | ProviderError::Server { .. }
                | ProviderError::Network(_)
        )
    }

    /// Map an HTTP status and body to the matching variant.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = body.chars().take(500).collect::<String>();
        match status {
            429 => ProviderError::RateLimited(message),
            408 | 504 => ProviderError::Timeout(message),
            500..=599 => ProviderError::Server { status, message },
            _ => ProviderError::Client { status, message },
        }
    }
}

/// Failure producing embeddings.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider unavailable after {attempts} attempts: {reason}")]
    Unavailable { attempts: u32, reason: ProviderError },
    #[error("embedding request rejected: {0}")]
    Rejected(ProviderError),
    #[error("embedding provider returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },
    #[error("embedding provider is disabled")]
    Disabled,
}

/// Failure of a streamed generation.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Nothing was produced; the provider could not be reached or refused.
    #[error("generation unavailable: {0}")]
    Unavailable(ProviderError),
    /// The stream broke after at least one fragment was emitted.
    #[error("generation interrupted after {} bytes: {reason}", .partial.len())]
    Interrupted { partial: String, reason: ProviderError },
}

impl GenerationError {
    /// Text produced before the failure (empty when nothing was produced).
    pub fn partial(&self) -> &str {
        match self {
            GenerationError::Unavailable(_) => "",
            GenerationError::Interrupted { partial, .. } => partial,
        }
    }
}

/// Failure of a knowledge sync run as a whole.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Another sync run holds the run lock.
    #[error("a sync run is already in progress")]
    InProgress,
    #[error("listing source documents failed: {0:#}")]
    Source(anyhow::Error),
    #[error("reading the index failed: {0:#}")]
    Index(anyhow::Error),
}
