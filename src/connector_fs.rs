//! Local directory source.
//!
//! Walks `root` with `walkdir`, filters relative paths through include and
//! exclude globs, and hashes file contents with SHA-256.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::config::FilesystemSourceConfig;
use crate::sources::{DocumentSource, SourceEntry, SourceListing, UnreadableEntry};

pub struct FilesystemSource {
    config: FilesystemSourceConfig,
}

impl FilesystemSource {
    pub fn new(config: FilesystemSourceConfig) -> Self {
        Self { config }
    }

    fn resolve(&self, uri: &str) -> Result<PathBuf> {
        let relative = Path::new(uri);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("invalid document uri: {}", uri);
        }
        Ok(self.config.root.join(relative))
    }
}

/// Walk the root, hashing every matching file. Runs on the blocking pool.
fn scan(config: &FilesystemSourceConfig) -> Result<SourceListing> {
    let root = &config.root;
    if !root.exists() {
        bail!("Filesystem source root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut listing = SourceListing::default();

    let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                // Only the root failing means the listing is unusable
                let Some(path) = err.path().filter(|p| *p != root.as_path()) else {
                    return Err(err.into());
                };
                let rel_str = relative_uri(path.strip_prefix(root).unwrap_or(path));
                let is_dir = std::fs::symlink_metadata(path).is_ok_and(|m| m.is_dir());
                if exclude_set.is_match(&rel_str) || (!is_dir && !include_set.is_match(&rel_str)) {
                    continue;
                }
                listing.unreadable.push(UnreadableEntry {
                    uri: rel_str,
                    reason: err.to_string(),
                });
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative_uri(relative);

        // Apply exclude patterns
        if exclude_set.is_match(&rel_str) {
            continue;
        }

        // Apply include patterns
        if !include_set.is_match(&rel_str) {
            continue;
        }

        match file_entry(path, rel_str.clone()) {
            Ok(source_entry) => listing.entries.push(source_entry),
            Err(e) => {
                listing.unreadable.push(UnreadableEntry {
                    uri: rel_str,
                    reason: format!("{:#}", e),
                });
            }
        }
    }

    // Sort for deterministic ordering
    listing.entries.sort_by(|a, b| a.uri.cmp(&b.uri));
    listing.unreadable.sort_by(|a, b| a.uri.cmp(&b.uri));

    Ok(listing)
}

fn relative_uri(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn file_entry(path: &Path, uri: String) -> Result<SourceEntry> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let modified = std::fs::metadata(path)?
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH);

    Ok(SourceEntry {
        uri,
        content_hash: sha256_hex(&bytes),
        updated_at: DateTime::<Utc>::from(modified),
    })
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[async_trait]
impl DocumentSource for FilesystemSource {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn list_documents(&self) -> Result<SourceListing> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || scan(&config))
            .await
            .context("listing task panicked")?
    }

    async fn fetch(&self, uri: &str) -> Result<Vec<u8>> {
        let path = self.resolve(uri)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))
    }
}
