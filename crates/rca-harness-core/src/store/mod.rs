//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait defines the storage operations the knowledge
//! indexer writes through and the retrieval engine reads through, enabling
//! pluggable backends (SQLite in the app crate, in-memory here).
//!
//! # Isolation
//!
//! [`commit_document`](VectorIndex::commit_document) and
//! [`remove_document`](VectorIndex::remove_document) are atomic from a
//! reader's perspective: a concurrent [`query`](VectorIndex::query) sees a
//! document's entries either entirely before or entirely after the call,
//! never a mix of versions.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Document, IndexEntry, RetrievalResult};

/// Abstract storage backend for chunk vectors and document records.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`commit_document`](VectorIndex::commit_document) | Replace a document's record and entries atomically |
/// | [`remove_document`](VectorIndex::remove_document) | Drop a document's record and entries atomically |
/// | [`upsert`](VectorIndex::upsert) | Insert or replace one entry by `(document_id, chunk_index)` |
/// | [`delete_by_document`](VectorIndex::delete_by_document) | Delete a document's entries, keeping its record |
/// | [`query`](VectorIndex::query) | Nearest-neighbour search, ranked by [`rank_hits`](crate::rank::rank_hits) |
/// | [`documents`](VectorIndex::documents) | List recorded documents |
/// | [`entries`](VectorIndex::entries) | List a document's entries in chunk order |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Replace everything stored for `document.id` with `entries` and
    /// upsert the document record, as one atomic batch.
    async fn commit_document(&self, document: &Document, entries: &[IndexEntry]) -> Result<()>;

    /// Remove a document record and all its entries. Returns the number
    /// of entries removed.
    async fn remove_document(&self, document_id: &str) -> Result<usize>;

    /// Insert or replace a single entry.
    async fn upsert(&self, entry: &IndexEntry) -> Result<()>;

    /// Delete all entries for a document. Returns the number removed.
    async fn delete_by_document(&self, document_id: &str) -> Result<usize>;

    /// Return at most `k` entries with cosine similarity `>= min_score`,
    /// score descending, ties by `document_id` then `chunk_index`.
    async fn query(&self, vector: &[f32], k: usize, min_score: f64) -> Result<RetrievalResult>;

    /// All recorded documents, ordered by `source_uri`.
    async fn documents(&self) -> Result<Vec<Document>>;

    /// Entries of one document ordered by `chunk_index`.
    async fn entries(&self, document_id: &str) -> Result<Vec<IndexEntry>>;
}
