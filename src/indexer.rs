//! Knowledge indexer: reconcile the vector index with the document source.
//!
//! One sync run:
//!
//! 1. List the source (URIs and content hashes only).
//! 2. For every document whose hash differs from the recorded one, fetch →
//!    extract → chunk → embed → summarize, then commit its entries and
//!    record in one atomic batch. A failure at any step before the commit
//!    leaves the previous version intact and is reported; the run
//!    continues. The summary is optional and never fails a document.
//! 3. Remove every recorded document no longer listed. Entries the source
//!    reported as unreadable count as failed and are not removed.
//!
//! Runs are serialized by a run lock. A second trigger while a run is in
//! flight returns [`SyncError::InProgress`] immediately.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::Mutex;

use rca_harness_core::chunk::chunk_text;
use rca_harness_core::embedding::Embedder;
use rca_harness_core::error::{EmbeddingError, SyncError};
use rca_harness_core::models::{document_id_for, Document, IndexEntry};
use rca_harness_core::store::VectorIndex;

use crate::config::ChunkingConfig;
use crate::extract::extract_document;
use crate::sources::{DocumentSource, SourceEntry};
use crate::summarizer::ReportSummarizer;

/// Outcome of one sync run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub documents_updated: usize,
    pub documents_deleted: usize,
    pub documents_failed: usize,
    pub documents_unchanged: usize,
    pub chunks_written: usize,
    pub failures: Vec<SyncFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncFailure {
    pub uri: String,
    pub reason: String,
}

pub struct KnowledgeIndexer {
    source: Arc<dyn DocumentSource>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    chunking: ChunkingConfig,
    summarizer: Option<ReportSummarizer>,
    run_lock: Mutex<()>,
}

impl KnowledgeIndexer {
    pub fn new(
        source: Arc<dyn DocumentSource>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        chunking: ChunkingConfig,
        summarizer: Option<ReportSummarizer>,
    ) -> Self {
        Self {
            source,
            embedder,
            index,
            chunking,
            summarizer,
            run_lock: Mutex::new(()),
        }
    }

    /// Run one reconciliation.
    pub async fn sync(&self) -> Result<SyncReport, SyncError> {
        let _guard = self.run_lock.try_lock().map_err(|_| SyncError::InProgress)?;

        let listing = self.source.list_documents().await.map_err(SyncError::Source)?;
        let listed = &listing.entries;
        let recorded = self.index.documents().await.map_err(SyncError::Index)?;
        let recorded: BTreeMap<String, Document> = recorded
            .into_iter()
            .map(|d| (d.source_uri.clone(), d))
            .collect();

        tracing::info!(
            source = self.source.name(),
            listed = listed.len(),
            unreadable = listing.unreadable.len(),
            recorded = recorded.len(),
            "sync started"
        );

        let mut report = SyncReport::default();
        let mut seen = HashSet::with_capacity(listed.len());

        for unreadable in &listing.unreadable {
            report.documents_failed += 1;
            tracing::warn!(uri = %unreadable.uri, error = %unreadable.reason, "source entry unreadable");
            report.failures.push(SyncFailure {
                uri: unreadable.uri.clone(),
                reason: unreadable.reason.clone(),
            });
        }

        for entry in listed {
            if !seen.insert(entry.uri.as_str()) {
                continue;
            }
            if let Some(doc) = recorded.get(&entry.uri) {
                if doc.content_hash == entry.content_hash {
                    report.documents_unchanged += 1;
                    continue;
                }
            }
            match self.index_document(entry).await {
                Ok(chunks) => {
                    report.documents_updated += 1;
                    report.chunks_written += chunks;
                    tracing::info!(uri = %entry.uri, chunks, "document indexed");
                }
                Err(e) => {
                    report.documents_failed += 1;
                    tracing::warn!(uri = %entry.uri, error = %format!("{:#}", e), "indexing failed");
                    report.failures.push(SyncFailure {
                        uri: entry.uri.clone(),
                        reason: format!("{:#}", e),
                    });
                }
            }
        }

        for (uri, doc) in &recorded {
            if seen.contains(uri.as_str()) || listing.unreadable.iter().any(|u| u.covers(uri)) {
                continue;
            }
            match self.index.remove_document(&doc.id).await {
                Ok(chunks) => {
                    report.documents_deleted += 1;
                    tracing::info!(uri = %uri, chunks, "document removed");
                }
                Err(e) => {
                    report.documents_failed += 1;
                    tracing::warn!(uri = %uri, error = %format!("{:#}", e), "removal failed");
                    report.failures.push(SyncFailure {
                        uri: uri.clone(),
                        reason: format!("{:#}", e),
                    });
                }
            }
        }

        tracing::info!(
            updated = report.documents_updated,
            deleted = report.documents_deleted,
            failed = report.documents_failed,
            unchanged = report.documents_unchanged,
            "sync finished"
        );
        Ok(report)
    }

    /// Build and commit the new version of one document. Returns the
    /// number of chunks written.
    async fn index_document(&self, entry: &SourceEntry) -> Result<usize> {
        let bytes = self
            .source
            .fetch(&entry.uri)
            .await
            .with_context(|| format!("fetching {}", entry.uri))?;

        let uri = entry.uri.clone();
        let (format, text) = tokio::task::spawn_blocking(move || extract_document(&uri, &bytes))
            .await
            .context("extraction task panicked")??;

        let document_id = document_id_for(&entry.uri);
        let chunks = chunk_text(
            &document_id,
            &text,
            self.chunking.window_tokens,
            self.chunking.overlap_tokens,
        );

        let vectors = if chunks.is_empty() {
            Vec::new()
        } else {
            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            self.embedder.embed(&texts).await?
        };
        if vectors.len() != chunks.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: chunks.len(),
                got: vectors.len(),
            }
            .into());
        }

        let summary = match &self.summarizer {
            Some(summarizer) => summarizer.summarize(&entry.uri, &text).await,
            None => None,
        };

        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry { chunk, vector })
            .collect();

        let document = Document {
            id: document_id,
            source_uri: entry.uri.clone(),
            content_hash: entry.content_hash.clone(),
            format,
            chunk_count: entries.len(),
            updated_at: entry.updated_at,
            summary,
        };
        self.index
            .commit_document(&document, &entries)
            .await
            .with_context(|| format!("committing {}", entry.uri))?;
        Ok(entries.len())
    }
}
