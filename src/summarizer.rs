//! Report summarizer: best-effort key-fact extraction during sync.
//!
//! One `complete` call per changed document, bounded by a timeout. Any
//! failure yields `None` and the document is indexed without a summary.

use std::sync::Arc;
use std::time::Duration;

use rca_harness_core::context::Prompt;
use rca_harness_core::summary::{parse_summary, summary_request, ReportSummary, SUMMARY_INSTRUCTIONS};

use crate::config::SummaryConfig;
use crate::generation::GenerationModel;

pub struct ReportSummarizer {
    model: Arc<dyn GenerationModel>,
    max_chars: usize,
    timeout: Duration,
}

impl ReportSummarizer {
    pub fn new(model: Arc<dyn GenerationModel>, config: &SummaryConfig) -> Self {
        Self {
            model,
            max_chars: config.max_chars,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub async fn summarize(&self, uri: &str, text: &str) -> Option<ReportSummary> {
        if text.trim().is_empty() {
            return None;
        }
        let prompt = Prompt::single(SUMMARY_INSTRUCTIONS, summary_request(text, self.max_chars));

        let reply = match tokio::time::timeout(self.timeout, self.model.complete(&prompt)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                tracing::warn!(uri, error = %e, "summary call failed, indexing without summary");
                return None;
            }
            Err(_) => {
                tracing::warn!(
                    uri,
                    timeout_secs = self.timeout.as_secs(),
                    "summary call timed out, indexing without summary"
                );
                return None;
            }
        };

        let summary = parse_summary(&reply);
        if summary.is_none() {
            let excerpt: String = reply.chars().take(200).collect();
            tracing::warn!(uri, reply = %excerpt, "unparseable summary");
        }
        summary
    }
}
