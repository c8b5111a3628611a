//! SQLite-backed [`VectorIndex`] implementation.
//!
//! Chunks and their vectors share one table keyed by
//! `(document_id, chunk_index)`. Each per-document replacement runs in a
//! single transaction; in WAL mode readers keep the snapshot they started
//! with, so a query never sees a half-written document.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use rca_harness_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use rca_harness_core::models::{
    chunk_id, Chunk, Document, DocumentFormat, IndexEntry, RetrievalHit, RetrievalResult,
};
use rca_harness_core::rank::rank_hits;
use rca_harness_core::store::VectorIndex;

/// SQLite implementation of the [`VectorIndex`] trait.
pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn document_from_row(row: &SqliteRow) -> Document {
    let format: String = row.get("format");
    let updated_at: i64 = row.get("updated_at");
    let chunk_count: i64 = row.get("chunk_count");
    let summary: Option<String> = row.get("summary_json");
    Document {
        id: row.get("id"),
        source_uri: row.get("source_uri"),
        content_hash: row.get("content_hash"),
        format: DocumentFormat::parse(&format).unwrap_or(DocumentFormat::PlainText),
        chunk_count: chunk_count as usize,
        updated_at: DateTime::<Utc>::from_timestamp(updated_at, 0).unwrap_or_default(),
        summary: summary.and_then(|json| serde_json::from_str(&json).ok()),
    }
}

fn entry_from_row(row: &SqliteRow) -> IndexEntry {
    let chunk_index: i64 = row.get("chunk_index");
    let overlap: i64 = row.get("overlap");
    let token_count: i64 = row.get("token_count");
    let blob: Vec<u8> = row.get("embedding");
    IndexEntry {
        chunk: Chunk {
            document_id: row.get("document_id"),
            chunk_index: chunk_index as u32,
            text: row.get("text"),
            overlap: overlap as usize,
            token_count: token_count as usize,
            hash: row.get("hash"),
        },
        vector: blob_to_vec(&blob),
    }
}

async fn insert_entry(tx: &mut Transaction<'_, Sqlite>, entry: &IndexEntry) -> Result<()> {
    let chunk = &entry.chunk;
    sqlx::query(
        r#"
        INSERT INTO chunks (document_id, chunk_index, text, overlap, token_count, hash, embedding)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(document_id, chunk_index) DO UPDATE SET
            text = excluded.text,
            overlap = excluded.overlap,
            token_count = excluded.token_count,
            hash = excluded.hash,
            embedding = excluded.embedding
        "#,
    )
    .bind(&chunk.document_id)
    .bind(chunk.chunk_index as i64)
    .bind(&chunk.text)
    .bind(chunk.overlap as i64)
    .bind(chunk.token_count as i64)
    .bind(&chunk.hash)
    .bind(vec_to_blob(&entry.vector))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn commit_document(&self, document: &Document, entries: &[IndexEntry]) -> Result<()> {
        let summary_json = document
            .summary
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(&document.id)
            .execute(&mut *tx)
            .await?;

        for entry in entries {
            insert_entry(&mut tx, entry).await?;
        }

        sqlx::query(
            r#"
            INSERT INTO documents (id, source_uri, content_hash, format, chunk_count, updated_at, summary_json)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                source_uri = excluded.source_uri,
                content_hash = excluded.content_hash,
                format = excluded.format,
                chunk_count = excluded.chunk_count,
                updated_at = excluded.updated_at,
                summary_json = excluded.summary_json
            "#,
        )
        .bind(&document.id)
        .bind(&document.source_uri)
        .bind(&document.content_hash)
        .bind(document.format.as_str())
        .bind(document.chunk_count as i64)
        .bind(document.updated_at.timestamp())
        .bind(summary_json)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn remove_document(&self, document_id: &str) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(removed as usize)
    }

    async fn upsert(&self, entry: &IndexEntry) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_entry(&mut tx, entry).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<usize> {
        let removed = sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(removed as usize)
    }

    async fn query(&self, vector: &[f32], k: usize, min_score: f64) -> Result<RetrievalResult> {
        let rows = sqlx::query(
            r#"
            SELECT c.document_id, c.chunk_index, c.text, c.embedding,
                   COALESCE(d.source_uri, '') AS source_uri
            FROM chunks c
            LEFT JOIN documents d ON d.id = c.document_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let hits: Vec<RetrievalHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let document_id: String = row.get("document_id");
                let chunk_index: i64 = row.get("chunk_index");
                RetrievalHit {
                    chunk_id: chunk_id(&document_id, chunk_index as u32),
                    document_id,
                    chunk_index: chunk_index as u32,
                    text: row.get("text"),
                    score: cosine_similarity(vector, &blob_to_vec(&blob)) as f64,
                    source_uri: row.get("source_uri"),
                }
            })
            .collect();

        Ok(rank_hits(hits, k, min_score))
    }

    async fn documents(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT id, source_uri, content_hash, format, chunk_count, updated_at, summary_json FROM documents ORDER BY source_uri ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(document_from_row).collect())
    }

    async fn entries(&self, document_id: &str) -> Result<Vec<IndexEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT document_id, chunk_index, text, overlap, token_count, hash, embedding
            FROM chunks WHERE document_id = ? ORDER BY chunk_index ASC
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(entry_from_row).collect())
    }
}
