//! Shared HTTP plumbing for model providers.
//!
//! Maps transport failures and HTTP statuses onto [`ProviderError`] so the
//! embedding and generation layers can decide what is worth retrying.

use anyhow::{Context, Result};
use std::time::Duration;

use rca_harness_core::error::ProviderError;

/// Build a client with a whole-request timeout.
pub fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .context("building HTTP client")
}

/// Read an API key from the environment.
pub fn api_key(var: &str) -> Result<String> {
    std::env::var(var).with_context(|| format!("{} environment variable not set", var))
}

/// Classify a `reqwest` transport error.
pub fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else if e.is_decode() {
        ProviderError::Malformed(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

/// Pass successful responses through; turn anything else into the
/// matching [`ProviderError`].
pub async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::from_status(status.as_u16(), &body))
}

/// POST a JSON body and decode a JSON reply.
pub async fn post_json(
    request: reqwest::RequestBuilder,
    body: &serde_json::Value,
) -> Result<serde_json::Value, ProviderError> {
    let response = request
        .header("Content-Type", "application/json")
        .json(body)
        .send()
        .await
        .map_err(transport_error)?;
    let response = check_status(response).await?;
    response
        .json()
        .await
        .map_err(|e| ProviderError::Malformed(e.to_string()))
}

/// Backoff before retry `attempt` (1-based): `base * 2^(attempt-1)`,
/// exponent capped at 5.
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(5);
    Duration::from_millis(base_ms.saturating_mul(1 << exp))
}
