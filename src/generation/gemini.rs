//! Gemini `generateContent` and `streamGenerateContent?alt=sse`.

use anyhow::Result;
use async_trait::async_trait;

use rca_harness_core::context::Prompt;
use rca_harness_core::error::ProviderError;
use rca_harness_core::models::Role;

use super::sse::{fragment_stream, SseData};
use super::{FragmentStream, GenerationModel};
use crate::config::GenerationConfig;
use crate::embedding::GEMINI_URL;
use crate::provider::{api_key, check_status, http_client, post_json, transport_error};

pub struct GeminiModel {
    model: String,
    url: String,
    api_key: String,
    temperature: f32,
    client: reqwest::Client,
}

impl GeminiModel {
    /// Requires `generation.model` and the `GEMINI_API_KEY` environment variable.
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for Gemini provider"))?;
        let url = config.url.clone().unwrap_or_else(|| GEMINI_URL.to_string());
        Ok(Self {
            model: model.trim_start_matches("models/").to_string(),
            url: url.trim_end_matches('/').to_string(),
            api_key: api_key("GEMINI_API_KEY")?,
            temperature: config.temperature,
            client: http_client(config.timeout_secs)?,
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/v1beta/models/{}:{}", self.url, self.model, method)
    }

    fn body(&self, prompt: &Prompt) -> serde_json::Value {
        let contents: Vec<serde_json::Value> = prompt
            .messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                };
                serde_json::json!({ "role": role, "parts": [{ "text": m.content }] })
            })
            .collect();
        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": { "temperature": self.temperature },
        });
        if !prompt.system.is_empty() {
            body["systemInstruction"] = serde_json::json!({ "parts": [{ "text": prompt.system }] });
        }
        body
    }
}

/// Concatenate `candidates[0].content.parts[].text`.
fn candidate_text(json: &serde_json::Value) -> Result<Option<String>, ProviderError> {
    if let Some(err) = json.get("error") {
        let status = err.get("code").and_then(|c| c.as_u64()).unwrap_or(500) as u16;
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or_default();
        return Err(ProviderError::from_status(status, message));
    }
    let Some(parts) = json
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
    else {
        return Ok(None);
    };
    Ok(Some(
        parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect(),
    ))
}

fn parse_event(data: &str) -> Result<SseData, ProviderError> {
    let json: serde_json::Value =
        serde_json::from_str(data).map_err(|e| ProviderError::Malformed(e.to_string()))?;
    Ok(match candidate_text(&json)? {
        Some(text) => SseData::Text(text),
        None => SseData::Skip,
    })
}

#[async_trait]
impl GenerationModel for GeminiModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String, ProviderError> {
        let request = self
            .client
            .post(self.endpoint("generateContent"))
            .header("x-goog-api-key", &self.api_key);
        let json = post_json(request, &self.body(prompt)).await?;
        candidate_text(&json)?
            .ok_or_else(|| ProviderError::Malformed("response has no candidates".to_string()))
    }

    async fn stream(&self, prompt: &Prompt) -> Result<FragmentStream, ProviderError> {
        let response = self
            .client
            .post(self.endpoint("streamGenerateContent"))
            .query(&[("alt", "sse")])
            .header("x-goog-api-key", &self.api_key)
            .json(&self.body(prompt))
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;
        Ok(fragment_stream(response, parse_event))
    }
}
