//! Gemini embeddings (`models/{model}:batchEmbedContents`).

use anyhow::Result;
use async_trait::async_trait;

use rca_harness_core::error::ProviderError;

use super::{json_vector, EmbeddingBackend};
use crate::config::EmbeddingConfig;
use crate::provider::{api_key, http_client, post_json};

pub const GEMINI_URL: &str = "https://generativelanguage.googleapis.com";

pub struct GeminiBackend {
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiBackend {
    /// Requires `model`, `dims`, and the `GEMINI_API_KEY` environment variable.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Gemini provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Gemini provider"))?;
        let url = config.url.clone().unwrap_or_else(|| GEMINI_URL.to_string());

        Ok(Self {
            model: model.trim_start_matches("models/").to_string(),
            dims,
            url: url.trim_end_matches('/').to_string(),
            api_key: api_key("GEMINI_API_KEY")?,
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for GeminiBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let model = format!("models/{}", self.model);
        let requests: Vec<serde_json::Value> = texts
            .iter()
            .map(|text| {
                serde_json::json!({
                    "model": model,
                    "content": { "parts": [{ "text": text }] },
                })
            })
            .collect();
        let body = serde_json::json!({ "requests": requests });
        let request = self
            .client
            .post(format!("{}/v1beta/{}:batchEmbedContents", self.url, model))
            .header("x-goog-api-key", &self.api_key);
        let json = post_json(request, &body).await?;

        json.get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| ProviderError::Malformed("missing embeddings array".to_string()))?
            .iter()
            .map(|item| {
                item.get("values")
                    .ok_or_else(|| ProviderError::Malformed("missing values".to_string()))
                    .and_then(json_vector)
            })
            .collect()
    }
}
