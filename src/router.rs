//! Intent router: decide whether a turn needs incident retrieval.
//!
//! Issues one constrained classification call and parses the reply with
//! the strict parser in [`rca_harness_core::intent`]. Every failure mode
//! (provider error, timeout, unparseable reply, low confidence) resolves to
//! `general_qa`; nothing here is surfaced to the user.

use std::sync::Arc;
use std::time::Duration;

use rca_harness_core::context::Prompt;
use rca_harness_core::intent::{
    classification_request, parse_classification, resolve, Classification, IntentDecision,
    CLASSIFIER_INSTRUCTIONS,
};
use rca_harness_core::models::ConversationTurn;

use crate::config::RouterConfig;
use crate::generation::GenerationModel;

pub struct IntentRouter {
    model: Arc<dyn GenerationModel>,
    threshold: f64,
    history_turns: usize,
    timeout: Duration,
}

impl IntentRouter {
    pub fn new(model: Arc<dyn GenerationModel>, config: &RouterConfig) -> Self {
        Self {
            model,
            threshold: config.threshold,
            history_turns: config.history_turns,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub async fn classify(&self, message: &str, history: &[ConversationTurn]) -> IntentDecision {
        let request = classification_request(message, history, self.history_turns);
        let prompt = Prompt::single(CLASSIFIER_INSTRUCTIONS, request);

        let reply = match tokio::time::timeout(self.timeout, self.model.complete(&prompt)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "classification call failed, defaulting to general_qa");
                return IntentDecision::default_general();
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.timeout.as_secs(),
                    "classification timed out, defaulting to general_qa"
                );
                return IntentDecision::default_general();
            }
        };

        let classification = parse_classification(&reply);
        if classification == Classification::Unparseable {
            let excerpt: String = reply.chars().take(200).collect();
            tracing::warn!(reply = %excerpt, "unparseable classification");
        }
        let decision = resolve(&classification, self.threshold);
        tracing::debug!(
            intent = decision.label.as_str(),
            confidence = decision.confidence,
            "intent classified"
        );
        decision
    }
}
