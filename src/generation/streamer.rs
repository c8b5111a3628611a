//! Cancellable token streaming over a [`GenerationModel`].
//!
//! [`GenerationStreamer::generate`] spawns a producer task that drives the
//! provider stream and forwards fragments through a bounded channel. The
//! returned [`TokenStream`] is finite and not restartable.
//!
//! Cancellation is checked at every suspension point on both sides of the
//! channel: once the token is set the consumer sees end-of-stream, never an
//! error, and fragments still buffered in the channel are discarded.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use rca_harness_core::context::Prompt;
use rca_harness_core::error::{GenerationError, ProviderError};
use rca_harness_core::models::StreamToken;

use super::{FragmentStream, GenerationModel};
use crate::config::GenerationConfig;

pub struct GenerationStreamer {
    model: Arc<dyn GenerationModel>,
    retry_backoff: Duration,
    channel_capacity: usize,
}

enum Outcome {
    Finished,
    Cancelled,
    Failed(ProviderError),
}

impl GenerationStreamer {
    pub fn new(
        model: Arc<dyn GenerationModel>,
        retry_backoff: Duration,
        channel_capacity: usize,
    ) -> Self {
        Self {
            model,
            retry_backoff,
            channel_capacity: channel_capacity.max(1),
        }
    }

    pub fn from_config(model: Arc<dyn GenerationModel>, config: &GenerationConfig) -> Self {
        Self::new(
            model,
            Duration::from_millis(config.retry_backoff_ms),
            config.channel_capacity,
        )
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    /// Start generating `prompt`. Setting `cancel` ends the returned stream
    /// early; dropping the stream stops the provider call.
    pub fn generate(&self, prompt: Prompt, cancel: &CancellationToken) -> TokenStream {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let cancel = cancel.child_token();
        let producer = Producer {
            model: self.model.clone(),
            retry_backoff: self.retry_backoff,
            cancel: cancel.clone(),
            tx,
        };
        tokio::spawn(producer.run(prompt));
        TokenStream {
            rx,
            cancel,
            done: false,
        }
    }
}

struct Producer {
    model: Arc<dyn GenerationModel>,
    retry_backoff: Duration,
    cancel: CancellationToken,
    tx: mpsc::Sender<Result<StreamToken, GenerationError>>,
}

impl Producer {
    async fn run(self, prompt: Prompt) {
        let mut partial = String::new();
        let mut retried = false;
        loop {
            let opened = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                opened = self.model.stream(&prompt) => opened,
            };
            let outcome = match opened {
                Ok(fragments) => self.pump(fragments, &mut partial).await,
                Err(e) => Outcome::Failed(e),
            };
            let reason = match outcome {
                Outcome::Finished | Outcome::Cancelled => return,
                Outcome::Failed(reason) => reason,
            };

            if partial.is_empty() && reason.is_transient() && !retried {
                retried = true;
                tracing::warn!(
                    model = self.model.model_name(),
                    error = %reason,
                    "generation failed before first token, retrying"
                );
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return,
                    _ = tokio::time::sleep(self.retry_backoff) => continue,
                }
            }

            let err = if partial.is_empty() {
                GenerationError::Unavailable(reason)
            } else {
                GenerationError::Interrupted { partial, reason }
            };
            tracing::warn!(model = self.model.model_name(), error = %err, "generation failed");
            let _ = self.tx.send(Err(err)).await;
            return;
        }
    }

    /// Forward fragments until the provider stream ends, fails, or the
    /// token is cancelled.
    async fn pump(&self, mut fragments: FragmentStream, partial: &mut String) -> Outcome {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Outcome::Cancelled,
                next = fragments.next() => next,
            };
            let text = match next {
                None => return Outcome::Finished,
                Some(Err(e)) => return Outcome::Failed(e),
                Some(Ok(text)) => text,
            };
            partial.push_str(&text);
            let sent = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Outcome::Cancelled,
                sent = self.tx.send(Ok(StreamToken::new(text))) => sent,
            };
            if sent.is_err() {
                return Outcome::Cancelled;
            }
        }
    }
}

/// Lazy sequence of generated fragments.
///
/// Yields `Ok` tokens in provider order. A failure is yielded at most once
/// as the final item; after it, or after cancellation, the stream is done.
pub struct TokenStream {
    rx: mpsc::Receiver<Result<StreamToken, GenerationError>>,
    cancel: CancellationToken,
    done: bool,
}

impl Stream for TokenStream {
    type Item = Result<StreamToken, GenerationError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done || self.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(Err(e))) => {
                self.done = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl Drop for TokenStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
