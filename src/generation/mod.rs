//! Generation model capability and its HTTP backends.
//!
//! A [`GenerationModel`] answers a [`Prompt`] either in one piece
//! ([`complete`](GenerationModel::complete), used by the intent router) or
//! as a stream of text fragments ([`stream`](GenerationModel::stream),
//! consumed by the [`GenerationStreamer`]).
//!
//! | Provider | Backend |
//! |----------|---------|
//! | `openai` | [`OpenAiChatModel`] against `api.openai.com` |
//! | `ollama` | [`OpenAiChatModel`] against Ollama's OpenAI-compatible `/v1` |
//! | `gemini` | [`GeminiModel`] |

mod gemini;
mod openai;
pub mod sse;
mod streamer;

pub use gemini::GeminiModel;
pub use openai::OpenAiChatModel;
pub use streamer::{GenerationStreamer, TokenStream};

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::sync::Arc;

use rca_harness_core::context::Prompt;
use rca_harness_core::error::ProviderError;

use crate::config::GenerationConfig;

/// Fragments of a streamed completion. A failure is yielded as the last item.
pub type FragmentStream = BoxStream<'static, Result<String, ProviderError>>;

#[async_trait]
pub trait GenerationModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Generate the full answer in one response.
    async fn complete(&self, prompt: &Prompt) -> Result<String, ProviderError>;

    /// Open a streamed generation. Errors before the first fragment are
    /// returned here; later ones arrive through the stream.
    async fn stream(&self, prompt: &Prompt) -> Result<FragmentStream, ProviderError>;
}

/// Model used when `generation.provider = "disabled"`.
pub struct DisabledModel;

#[async_trait]
impl GenerationModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _prompt: &Prompt) -> Result<String, ProviderError> {
        Err(ProviderError::Disabled)
    }

    async fn stream(&self, _prompt: &Prompt) -> Result<FragmentStream, ProviderError> {
        Err(ProviderError::Disabled)
    }
}

/// Build the configured generation model.
pub fn create_model(config: &GenerationConfig) -> Result<Arc<dyn GenerationModel>> {
    Ok(match config.provider.as_str() {
        "disabled" => Arc::new(DisabledModel),
        "openai" => Arc::new(OpenAiChatModel::openai(config)?),
        "ollama" => Arc::new(OpenAiChatModel::ollama(config)?),
        "gemini" => Arc::new(GeminiModel::new(config)?),
        other => bail!("Unknown generation provider: {}", other),
    })
}
