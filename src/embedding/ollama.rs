//! Ollama embeddings (`POST /api/embed`).
//!
//! Requires Ollama to be running with an embedding model pulled
//! (e.g. `ollama pull nomic-embed-text`).

use anyhow::Result;
use async_trait::async_trait;

use rca_harness_core::error::ProviderError;

use super::{json_vector, EmbeddingBackend};
use crate::config::EmbeddingConfig;
use crate::provider::{http_client, post_json};

pub struct OllamaBackend {
    model: String,
    dims: usize,
    url: String,
    client: reqwest::Client,
}

impl OllamaBackend {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let request = self.client.post(format!("{}/api/embed", self.url));
        let json = post_json(request, &body).await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, ProviderError> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| ProviderError::Malformed("missing embeddings array".to_string()))?
        .iter()
        .map(json_vector)
        .collect()
}
