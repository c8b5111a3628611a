//! OpenAI-compatible chat completions (`POST /v1/chat/completions`).
//!
//! Used for OpenAI itself and for Ollama's compatible endpoint.

use anyhow::Result;
use async_trait::async_trait;

use rca_harness_core::context::Prompt;
use rca_harness_core::error::ProviderError;
use rca_harness_core::models::Role;

use super::sse::{fragment_stream, SseData};
use super::{FragmentStream, GenerationModel};
use crate::config::GenerationConfig;
use crate::provider::{api_key, check_status, http_client, post_json, transport_error};

pub struct OpenAiChatModel {
    model: String,
    url: String,
    api_key: Option<String>,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiChatModel {
    /// OpenAI, authenticated with `OPENAI_API_KEY`.
    pub fn openai(config: &GenerationConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());
        Self::build(config, url, Some(api_key("OPENAI_API_KEY")?))
    }

    /// A local Ollama instance, unauthenticated.
    pub fn ollama(config: &GenerationConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Self::build(config, url, None)
    }

    fn build(config: &GenerationConfig, url: String, api_key: Option<String>) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required"))?;
        Ok(Self {
            model,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            temperature: config.temperature,
            client: http_client(config.timeout_secs)?,
        })
    }

    fn request(&self) -> reqwest::RequestBuilder {
        let req = self
            .client
            .post(format!("{}/v1/chat/completions", self.url));
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    fn body(&self, prompt: &Prompt, stream: bool) -> serde_json::Value {
        let mut messages = Vec::with_capacity(prompt.messages.len() + 1);
        if !prompt.system.is_empty() {
            messages.push(serde_json::json!({ "role": "system", "content": prompt.system }));
        }
        for m in &prompt.messages {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            messages.push(serde_json::json!({ "role": role, "content": m.content }));
        }
        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "stream": stream,
        })
    }
}

/// Parse one streamed `chat.completion.chunk` event.
fn parse_chunk(data: &str) -> Result<SseData, ProviderError> {
    if data.trim() == "[DONE]" {
        return Ok(SseData::Done);
    }
    let json: serde_json::Value =
        serde_json::from_str(data).map_err(|e| ProviderError::Malformed(e.to_string()))?;
    if let Some(err) = json.get("error") {
        return Err(ProviderError::Server {
            status: 500,
            message: err.to_string(),
        });
    }
    Ok(json
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
        .map(|c| SseData::Text(c.to_string()))
        .unwrap_or(SseData::Skip))
}

#[async_trait]
impl GenerationModel for OpenAiChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String, ProviderError> {
        let json = post_json(self.request(), &self.body(prompt, false)).await?;
        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Malformed("missing choices[0].message.content".into()))
    }

    async fn stream(&self, prompt: &Prompt) -> Result<FragmentStream, ProviderError> {
        let response = self
            .request()
            .header("Content-Type", "application/json")
            .json(&self.body(prompt, true))
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;
        Ok(fragment_stream(response, parse_chunk))
    }
}
