//! Core data models shared by the indexing and conversation pipelines.
//!
//! A [`Document`] is one ingested source file, identified by its
//! `source_uri`. Its text is split into ordered [`Chunk`]s which are
//! embedded and persisted as [`IndexEntry`]s. Queries against the index
//! produce [`RetrievalHit`]s collected into a [`RetrievalResult`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::summary::ReportSummary;

/// Namespace for deriving document ids from source URIs.
const DOCUMENT_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a8e_93d4_4b07_a5e2_4c1d_0b9e_77a3);

/// Derive the stable document id for a source URI.
///
/// The id is a UUIDv5 of the URI, so re-indexing the same source always
/// reuses the same id and the same composite chunk keys.
pub fn document_id_for(source_uri: &str) -> String {
    Uuid::new_v5(&DOCUMENT_NAMESPACE, source_uri.as_bytes()).to_string()
}

/// Text format of a source document, chosen from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    PlainText,
    Markdown,
    Pdf,
    Docx,
}

impl DocumentFormat {
    /// Map a file name or URI to a format by its (case-insensitive) extension.
    pub fn from_uri(uri: &str) -> Option<Self> {
        let name = uri.rsplit('/').next().unwrap_or(uri);
        let ext = name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase())?;
        match ext.as_str() {
            "txt" | "text" | "log" => Some(Self::PlainText),
            "md" | "markdown" => Some(Self::Markdown),
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlainText => "plain_text",
            Self::Markdown => "markdown",
            Self::Pdf => "pdf",
            Self::Docx => "docx",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "plain_text" => Some(Self::PlainText),
            "markdown" => Some(Self::Markdown),
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            _ => None,
        }
    }
}

/// The index's record of an ingested source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub source_uri: String,
    pub content_hash: String,
    pub format: DocumentFormat,
    pub chunk_count: usize,
    pub updated_at: DateTime<Utc>,
    /// Model-extracted key facts; absent when extraction failed or is off.
    #[serde(default)]
    pub summary: Option<ReportSummary>,
}

/// A window of a document's text.
///
/// `overlap` is the number of leading bytes of `text` that repeat the tail
/// of the previous chunk; `text[overlap..]` of every chunk concatenated in
/// order reconstructs the document text exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub document_id: String,
    pub chunk_index: u32,
    pub text: String,
    pub overlap: usize,
    pub token_count: usize,
    /// SHA-256 of `text`, lowercase hex.
    pub hash: String,
}

impl Chunk {
    /// Composite key `(document_id, chunk_index)` rendered as a string.
    pub fn id(&self) -> String {
        chunk_id(&self.document_id, self.chunk_index)
    }

    /// The part of this chunk not shared with its predecessor.
    pub fn novel_text(&self) -> &str {
        &self.text[self.overlap..]
    }
}

pub fn chunk_id(document_id: &str, chunk_index: u32) -> String {
    format!("{}:{}", document_id, chunk_index)
}

/// A chunk together with its embedding, as persisted in the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// One ranked piece of evidence returned by the index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalHit {
    pub chunk_id: String,
    pub document_id: String,
    pub chunk_index: u32,
    pub text: String,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f64,
    pub source_uri: String,
}

/// Ordered retrieval output: score descending, then `document_id`, then
/// `chunk_index` ascending.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub hits: Vec<RetrievalHit>,
}

impl RetrievalResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// Reference to a piece of evidence an assistant turn was grounded on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRef {
    pub source_uri: String,
    pub chunk_id: String,
    pub score: f64,
}

/// One message of a session's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<EvidenceRef>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            evidence: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            evidence: Vec::new(),
        }
    }
}

/// An immutable fragment of generated text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamToken(String);

impl StreamToken {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}
