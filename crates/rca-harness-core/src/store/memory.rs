//! In-memory [`VectorIndex`] implementation for tests and embedding.
//!
//! All state sits behind a single `std::sync::RwLock`, so every write is
//! applied under one exclusive lock and readers never observe a partially
//! replaced document. Query is brute-force cosine similarity.

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{Document, IndexEntry, RetrievalHit, RetrievalResult};
use crate::rank::rank_hits;

use super::VectorIndex;

#[derive(Default)]
struct IndexState {
    documents: BTreeMap<String, Document>,
    /// Keyed by `(document_id, chunk_index)`.
    entries: BTreeMap<(String, u32), IndexEntry>,
}

impl IndexState {
    fn drop_entries(&mut self, document_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(doc, _), _| doc != document_id);
        before - self.entries.len()
    }
}

/// In-memory vector index.
#[derive(Default)]
pub struct InMemoryIndex {
    state: RwLock<IndexState>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory index lock poisoned")
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn commit_document(&self, document: &Document, entries: &[IndexEntry]) -> Result<()> {
        let mut state = self.state.write().map_err(poisoned)?;
        state.drop_entries(&document.id);
        for entry in entries {
            state.entries.insert(
                (entry.chunk.document_id.clone(), entry.chunk.chunk_index),
                entry.clone(),
            );
        }
        state.documents.insert(document.id.clone(), document.clone());
        Ok(())
    }

    async fn remove_document(&self, document_id: &str) -> Result<usize> {
        let mut state = self.state.write().map_err(poisoned)?;
        let removed = state.drop_entries(document_id);
        state.documents.remove(document_id);
        Ok(removed)
    }

    async fn upsert(&self, entry: &IndexEntry) -> Result<()> {
        let mut state = self.state.write().map_err(poisoned)?;
        state.entries.insert(
            (entry.chunk.document_id.clone(), entry.chunk.chunk_index),
            entry.clone(),
        );
        Ok(())
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<usize> {
        let mut state = self.state.write().map_err(poisoned)?;
        Ok(state.drop_entries(document_id))
    }

    async fn query(&self, vector: &[f32], k: usize, min_score: f64) -> Result<RetrievalResult> {
        let state = self.state.read().map_err(poisoned)?;
        let hits = state
            .entries
            .values()
            .map(|entry| {
                let source_uri = state
                    .documents
                    .get(&entry.chunk.document_id)
                    .map(|d| d.source_uri.clone())
                    .unwrap_or_default();
                RetrievalHit {
                    chunk_id: entry.chunk.id(),
                    document_id: entry.chunk.document_id.clone(),
                    chunk_index: entry.chunk.chunk_index,
                    text: entry.chunk.text.clone(),
                    score: cosine_similarity(vector, &entry.vector) as f64,
                    source_uri,
                }
            })
            .collect();
        Ok(rank_hits(hits, k, min_score))
    }

    async fn documents(&self) -> Result<Vec<Document>> {
        let state = self.state.read().map_err(poisoned)?;
        let mut docs: Vec<Document> = state.documents.values().cloned().collect();
        docs.sort_by(|a, b| a.source_uri.cmp(&b.source_uri));
        Ok(docs)
    }

    async fn entries(&self, document_id: &str) -> Result<Vec<IndexEntry>> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state
            .entries
            .iter()
            .filter(|((doc, _), _)| doc == document_id)
            .map(|(_, entry)| entry.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{document_id_for, Chunk, DocumentFormat};
    use chrono::Utc;

    fn document(uri: &str, chunks: usize) -> Document {
        Document {
            id: document_id_for(uri),
            source_uri: uri.to_string(),
            content_hash: "h1".to_string(),
            format: DocumentFormat::Markdown,
            chunk_count: chunks,
            updated_at: Utc::now(),
            summary: None,
        }
    }

    fn entry(doc: &Document, idx: u32, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            chunk: Chunk {
                document_id: doc.id.clone(),
                chunk_index: idx,
                text: format!("{} chunk {}", doc.source_uri, idx),
                overlap: 0,
                token_count: 4,
                hash: String::new(),
            },
            vector,
        }
    }

    #[tokio::test]
    async fn commit_replaces_previous_version() {
        let index = InMemoryIndex::new();
        let doc = document("incident-42.md", 3);
        let v1: Vec<IndexEntry> = (0..3).map(|i| entry(&doc, i, vec![1.0, 0.0])).collect();
        index.commit_document(&doc, &v1).await.unwrap();

        let doc2 = document("incident-42.md", 1);
        let v2 = vec![entry(&doc2, 0, vec![0.0, 1.0])];
        index.commit_document(&doc2, &v2).await.unwrap();

        let stored = index.entries(&doc.id).await.unwrap();
        assert_eq!(stored, v2);
        assert_eq!(index.documents().await.unwrap()[0].chunk_count, 1);
    }

    #[tokio::test]
    async fn query_filters_and_attaches_source() {
        let index = InMemoryIndex::new();
        let doc = document("drinkprime.md", 2);
        let entries = vec![entry(&doc, 0, vec![1.0, 0.0]), entry(&doc, 1, vec![0.0, 1.0])];
        index.commit_document(&doc, &entries).await.unwrap();

        let result = index.query(&[1.0, 0.1], 5, 0.2).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.hits[0].source_uri, "drinkprime.md");
        assert_eq!(result.hits[0].chunk_index, 0);
    }

    #[tokio::test]
    async fn remove_document_drops_record_and_entries() {
        let index = InMemoryIndex::new();
        let doc = document("old.md", 2);
        let entries = vec![entry(&doc, 0, vec![1.0]), entry(&doc, 1, vec![1.0])];
        index.commit_document(&doc, &entries).await.unwrap();

        assert_eq!(index.remove_document(&doc.id).await.unwrap(), 2);
        assert!(index.documents().await.unwrap().is_empty());
        assert!(index.query(&[1.0], 5, -1.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_replaces_in_place() {
        let index = InMemoryIndex::new();
        let doc = document("a.md", 1);
        index.upsert(&entry(&doc, 0, vec![1.0, 0.0])).await.unwrap();
        index.upsert(&entry(&doc, 0, vec![0.0, 1.0])).await.unwrap();
        let stored = index.entries(&doc.id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].vector, vec![0.0, 1.0]);
        assert_eq!(index.delete_by_document(&doc.id).await.unwrap(), 1);
    }
}
