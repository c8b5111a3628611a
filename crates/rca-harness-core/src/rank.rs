//! Deterministic ranking of scored chunks.
//!
//! Every [`VectorIndex`](crate::store::VectorIndex) implementation scores
//! candidates its own way and then funnels them through [`rank_hits`] so
//! that ordering, filtering, and truncation are identical across backends:
//!
//! 1. Drop hits with `score < min_score` (and non-finite scores).
//! 2. Sort by score descending, then `document_id`, then `chunk_index`.
//! 3. Truncate to `k`.

use std::cmp::Ordering;

use crate::models::{RetrievalHit, RetrievalResult};

/// Total order used for retrieval results.
pub fn compare_hits(a: &RetrievalHit, b: &RetrievalHit) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.document_id.cmp(&b.document_id))
        .then_with(|| a.chunk_index.cmp(&b.chunk_index))
}

/// Filter, order, and truncate candidate hits.
pub fn rank_hits(mut hits: Vec<RetrievalHit>, k: usize, min_score: f64) -> RetrievalResult {
    hits.retain(|h| h.score.is_finite() && h.score >= min_score);
    hits.sort_by(compare_hits);
    hits.truncate(k);
    RetrievalResult { hits }
}
