//! Google Cloud Storage source.
//!
//! Lists objects through the GCS JSON API and downloads them with
//! `alt=media`. The content hash is the object's `md5Hash` (base64 in the
//! API) re-encoded as lowercase hex, so unchanged objects are detected
//! without downloading them.
//!
//! # Configuration
//!
//! ```toml
//! [source]
//! kind = "gcs"
//! bucket = "rca-reports"
//! prefix = "rcas/"
//! token_env = "GCS_ACCESS_TOKEN"   # bearer token variable
//! ```
//!
//! # Pagination
//!
//! Listing follows `nextPageToken` until the bucket is exhausted.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use rca_harness_core::models::DocumentFormat;

use crate::config::GcsSourceConfig;
use crate::sources::{DocumentSource, SourceEntry, SourceListing, UnreadableEntry};

const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

pub struct GcsSource {
    config: GcsSourceConfig,
    endpoint: String,
    token: Option<String>,
    client: reqwest::Client,
    label: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectResource>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectResource {
    name: String,
    md5_hash: Option<String>,
    updated: Option<DateTime<Utc>>,
}

impl GcsSource {
    /// Build from configuration, reading the bearer token from
    /// `token_env` when set. Public buckets work without a token.
    pub fn from_config(config: GcsSourceConfig) -> Result<Self> {
        if config.bucket.trim().is_empty() {
            bail!("source.bucket must be set for the gcs source");
        }
        let token = std::env::var(&config.token_env).ok();
        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
            .trim_end_matches('/')
            .to_string();
        let label = format!("gcs:{}", config.bucket);
        Ok(Self {
            config,
            endpoint,
            token,
            client: reqwest::Client::new(),
            label,
        })
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn list_page(&self, page_token: Option<&str>) -> Result<ObjectList> {
        let url = format!("{}/storage/v1/b/{}/o", self.endpoint, self.config.bucket);
        let mut query: Vec<(&str, &str)> =
            vec![("fields", "items(name,md5Hash,updated),nextPageToken")];
        if !self.config.prefix.is_empty() {
            query.push(("prefix", &self.config.prefix));
        }
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }

        let resp = self
            .authorize(self.client.get(&url).query(&query))
            .send()
            .await
            .with_context(|| format!("listing gs://{}", self.config.bucket))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("GCS list error ({}): {}", status, body);
        }
        Ok(resp.json().await?)
    }
}

/// Convert the API's base64 `md5Hash` to lowercase hex.
pub fn md5_base64_to_hex(value: &str) -> Result<String> {
    let raw = base64::engine::general_purpose::STANDARD
        .decode(value)
        .with_context(|| format!("invalid md5Hash: {}", value))?;
    Ok(hex::encode(raw))
}

#[async_trait]
impl DocumentSource for GcsSource {
    fn name(&self) -> &str {
        &self.label
    }

    async fn list_documents(&self) -> Result<SourceListing> {
        let mut listing = SourceListing::default();
        let mut page_token: Option<String> = None;

        loop {
            let page = self.list_page(page_token.as_deref()).await?;
            for object in page.items {
                // Skip folder placeholders and formats we cannot extract
                if object.name.ends_with('/') || DocumentFormat::from_uri(&object.name).is_none() {
                    continue;
                }
                match object_entry(object) {
                    Ok(entry) => listing.entries.push(entry),
                    Err(unreadable) => listing.unreadable.push(unreadable),
                }
            }
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        listing.entries.sort_by(|a, b| a.uri.cmp(&b.uri));
        listing.unreadable.sort_by(|a, b| a.uri.cmp(&b.uri));
        Ok(listing)
    }

    async fn fetch(&self, uri: &str) -> Result<Vec<u8>> {
        let url = format!(
            "{}/storage/v1/b/{}/o/{}",
            self.endpoint,
            self.config.bucket,
            encode_object_name(uri)
        );
        let resp = self
            .authorize(self.client.get(&url).query(&[("alt", "media")]))
            .send()
            .await
            .with_context(|| format!("downloading gs://{}/{}", self.config.bucket, uri))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("GCS download error ({}): {}", status, body);
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

fn object_entry(object: ObjectResource) -> std::result::Result<SourceEntry, UnreadableEntry> {
    let hash = match object.md5_hash.as_deref() {
        Some(md5) => md5_base64_to_hex(md5).map_err(|e| format!("{:#}", e)),
        None => Err("object has no md5Hash".to_string()),
    };
    match hash {
        Ok(content_hash) => Ok(SourceEntry {
            content_hash,
            updated_at: object.updated.unwrap_or_default(),
            uri: object.name,
        }),
        Err(reason) => Err(UnreadableEntry {
            uri: object.name,
            reason,
        }),
    }
}

/// Percent-encode an object name for use as a single path segment.
fn encode_object_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
