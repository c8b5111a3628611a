//! Retrieval engine: embed a query and look it up in the vector index.
//!
//! Retrieval is best-effort. An embedding or index failure logs a warning
//! and yields an empty [`RetrievalResult`], so the turn proceeds without
//! grounding instead of failing.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use rca_harness_core::embedding::{embed_one, Embedder};
use rca_harness_core::intent::IntentLabel;
use rca_harness_core::models::RetrievalResult;
use rca_harness_core::store::VectorIndex;
use rca_harness_core::summary::ReportSummary;

use crate::config::{GeneralRetrieval, RetrievalConfig};

pub struct RetrievalEngine {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            config,
        }
    }

    /// At most `k` hits with `score >= min_score`, best first.
    pub async fn retrieve(&self, query: &str, k: usize, min_score: f64) -> RetrievalResult {
        if query.trim().is_empty() || k == 0 {
            return RetrievalResult::empty();
        }

        let vector = match embed_one(self.embedder.as_ref(), query).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed, continuing without evidence");
                return RetrievalResult::empty();
            }
        };

        match self.index.query(&vector, k, min_score).await {
            Ok(result) => {
                tracing::debug!(hits = result.len(), k, min_score, "retrieval complete");
                result
            }
            Err(e) => {
                tracing::warn!(
                    error = %format!("{:#}", e),
                    "index query failed, continuing without evidence"
                );
                RetrievalResult::empty()
            }
        }
    }

    /// Retrieve with the configured defaults.
    pub async fn search(&self, query: &str) -> RetrievalResult {
        self.retrieve(query, self.config.top_k, self.config.min_score)
            .await
    }

    /// Retrieve evidence for a routed turn. Specialist turns use the
    /// configured `top_k`/`min_score`; general turns use the widened
    /// parameters or skip retrieval, per `retrieval.general`.
    pub async fn for_intent(&self, label: IntentLabel, query: &str) -> RetrievalResult {
        match (label, self.config.general) {
            (IntentLabel::SpecialistIncident, _) => self.search(query).await,
            (IntentLabel::GeneralQa, GeneralRetrieval::Skip) => RetrievalResult::empty(),
            (IntentLabel::GeneralQa, GeneralRetrieval::Widened) => {
                self.retrieve(
                    query,
                    self.config.general_top_k,
                    self.config.general_min_score,
                )
                .await
            }
        }
    }

    /// Recorded summaries of the documents behind `result`, keyed by
    /// document id. Best-effort like retrieval itself.
    pub async fn summaries_for(&self, result: &RetrievalResult) -> BTreeMap<String, ReportSummary> {
        if result.is_empty() {
            return BTreeMap::new();
        }
        let wanted: HashSet<&str> = result.hits.iter().map(|h| h.document_id.as_str()).collect();
        match self.index.documents().await {
            Ok(documents) => documents
                .into_iter()
                .filter(|d| wanted.contains(d.id.as_str()))
                .filter_map(|d| d.summary.map(|summary| (d.id, summary)))
                .collect(),
            Err(e) => {
                tracing::warn!(
                    error = %format!("{:#}", e),
                    "loading document summaries failed, continuing without them"
                );
                BTreeMap::new()
            }
        }
    }
}
