//! Source document listing capability.
//!
//! The knowledge indexer reconciles the index against a [`DocumentSource`].
//! Listing is cheap (URIs and content hashes only); bytes are fetched only
//! for documents whose hash changed.
//!
//! A listing only fails as a whole when the source itself is unreachable.
//! Entries that cannot be read or hashed are reported in
//! [`SourceListing::unreadable`] so the indexer can count them as failed
//! while keeping their previously indexed version.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::{Config, SourceConfig};
use crate::connector_fs::FilesystemSource;
use crate::connector_gcs::GcsSource;

/// One document as reported by a source listing.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceEntry {
    /// Stable identity of the document within the source.
    pub uri: String,
    /// Lowercase hex digest of the current content.
    pub content_hash: String,
    pub updated_at: DateTime<Utc>,
}

/// A listed path that could not be read. When `uri` names a directory,
/// everything beneath it is covered.
#[derive(Debug, Clone, PartialEq)]
pub struct UnreadableEntry {
    pub uri: String,
    pub reason: String,
}

impl UnreadableEntry {
    /// Whether the document at `uri` is hidden by this entry.
    pub fn covers(&self, uri: &str) -> bool {
        uri == self.uri
            || uri
                .strip_prefix(self.uri.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceListing {
    /// Readable documents, ordered by `uri`.
    pub entries: Vec<SourceEntry>,
    pub unreadable: Vec<UnreadableEntry>,
}

/// A blob store holding the source documents.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Label used in logs (e.g. `"filesystem"`, `"gcs:rca-reports"`).
    fn name(&self) -> &str;

    /// All current documents.
    async fn list_documents(&self) -> Result<SourceListing>;

    /// Raw bytes of one listed document.
    async fn fetch(&self, uri: &str) -> Result<Vec<u8>>;
}

/// Build the configured source.
pub fn source_from_config(config: &Config) -> Result<Arc<dyn DocumentSource>> {
    Ok(match &config.source {
        SourceConfig::Filesystem(fs) => Arc::new(FilesystemSource::new(fs.clone())),
        SourceConfig::Gcs(gcs) => Arc::new(GcsSource::from_config(gcs.clone())?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreadable_directory_covers_its_contents() {
        let dir = UnreadableEntry {
            uri: "2024".to_string(),
            reason: "permission denied".to_string(),
        };
        assert!(dir.covers("2024"));
        assert!(dir.covers("2024/dns.md"));
        assert!(!dir.covers("2024-dns.md"));
        assert!(!dir.covers("incident-42.md"));
    }
}
