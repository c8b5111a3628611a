//! Embedding providers and the batching/retry wrapper.
//!
//! Each HTTP backend implements [`EmbeddingBackend`] for a single request:
//! - **[`OpenAiBackend`]** calls `POST /v1/embeddings`.
//! - **[`OllamaBackend`]** calls a local Ollama instance's `/api/embed` endpoint.
//! - **[`GeminiBackend`]** calls `:batchEmbedContents`.
//!
//! [`RetryingEmbedder`] turns any backend into a core
//! [`Embedder`](rca_harness_core::embedding::Embedder).
//!
//! # Retry Strategy
//!
//! - HTTP 429, 408/504, and 5xx → retry
//! - HTTP 4xx (other) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: `retry_base_ms` × 1, 2, 4, 8, 16, 32 (capped at 2^5)
//!
//! After `max_retries` retries the call fails with
//! [`EmbeddingError::Unavailable`].

mod gemini;
mod ollama;
mod openai;

pub use gemini::{GeminiBackend, GEMINI_URL};
pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use rca_harness_core::embedding::Embedder;
use rca_harness_core::error::{EmbeddingError, ProviderError};

use crate::config::EmbeddingConfig;
use crate::provider::backoff_delay;

/// One provider request: embed `texts` in order.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}

/// Retry and batching policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_base_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            retry_base_ms: config.retry_base_ms,
        }
    }
}

/// Splits input into provider-sized batches and retries transient failures.
pub struct RetryingEmbedder<B> {
    backend: B,
    policy: RetryPolicy,
}

impl<B: EmbeddingBackend> RetryingEmbedder<B> {
    pub fn new(backend: B, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    async fn embed_with_retry(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut attempt = 0u32;
        loop {
            let err = match self.backend.embed_batch(batch).await {
                Ok(vectors) => return self.check(batch.len(), vectors),
                Err(err) => err,
            };
            if !err.is_transient() {
                return Err(EmbeddingError::Rejected(err));
            }
            if attempt >= self.policy.max_retries {
                return Err(EmbeddingError::Unavailable {
                    attempts: attempt + 1,
                    reason: err,
                });
            }
            attempt += 1;
            let delay = backoff_delay(self.policy.retry_base_ms, attempt);
            tracing::warn!(
                model = self.backend.model_name(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "embedding request failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn check(
        &self,
        expected: usize,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if vectors.len() != expected {
            return Err(EmbeddingError::CountMismatch {
                expected,
                got: vectors.len(),
            });
        }
        let dims = self.backend.dims();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
            return Err(EmbeddingError::Rejected(ProviderError::Malformed(format!(
                "expected {} dimensions, got {}",
                dims,
                bad.len()
            ))));
        }
        Ok(vectors)
    }
}

#[async_trait]
impl<B: EmbeddingBackend> Embedder for RetryingEmbedder<B> {
    fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    fn dims(&self) -> usize {
        self.backend.dims()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.policy.batch_size) {
            out.extend(self.embed_with_retry(batch).await?);
        }
        Ok(out)
    }
}

/// Embedder used when `embedding.provider = "disabled"`.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::Disabled)
    }
}

/// Build the configured embedder.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    let policy = RetryPolicy::from_config(config);
    Ok(match config.provider.as_str() {
        "disabled" => Arc::new(DisabledEmbedder),
        "openai" => Arc::new(RetryingEmbedder::new(OpenAiBackend::new(config)?, policy)),
        "ollama" => Arc::new(RetryingEmbedder::new(OllamaBackend::new(config)?, policy)),
        "gemini" => Arc::new(RetryingEmbedder::new(GeminiBackend::new(config)?, policy)),
        other => bail!("Unknown embedding provider: {}", other),
    })
}

/// Decode a JSON array of numbers into a vector.
fn json_vector(value: &serde_json::Value) -> Result<Vec<f32>, ProviderError> {
    value
        .as_array()
        .ok_or_else(|| ProviderError::Malformed("embedding is not an array".to_string()))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| ProviderError::Malformed("embedding value is not a number".to_string()))
        })
        .collect()
}
