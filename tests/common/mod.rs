//! Shared fixtures for the integration tests.
//!
//! Provider capabilities are replaced with deterministic in-process fakes so
//! the pipeline runs end-to-end against a real SQLite database without any
//! network access.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use tempfile::TempDir;

use rca_harness::config::{parse_config, Config};
use rca_harness::connector_fs::FilesystemSource;
use rca_harness::db;
use rca_harness::generation::{FragmentStream, GenerationModel};
use rca_harness::migrate;
use rca_harness::runtime::{Capabilities, Runtime};
use rca_harness::sources::{source_from_config, DocumentSource};
use rca_harness_core::context::Prompt;
use rca_harness_core::embedding::Embedder;
use rca_harness_core::error::{EmbeddingError, ProviderError};
use rca_harness_core::summary::SUMMARY_INSTRUCTIONS;

pub const DIMS: usize = 64;

pub const INCIDENT_42_V1: &str = "# Incident 42: checkout outage\n\n\
Symptoms: checkout returned HTTP 500 errors for twenty minutes.\n\n\
Root cause: the database connection pool was exhausted by a leaked transaction.\n\n\
Resolution: restarted the pool and fixed the leak in the payment worker.\n";

pub const INCIDENT_42_V2: &str = "# Incident 42: checkout outage (revised)\n\n\
Root cause: a connection leak in the payment worker exhausted the pool.\n";

pub const SPECIALIST: &str =
    r#"{"label": "specialist_incident", "confidence": 0.92, "rationale": "live outage"}"#;
pub const GENERAL: &str =
    r#"{"label": "general_qa", "confidence": 0.88, "rationale": "knowledge base question"}"#;
pub const CHECKOUT_SUMMARY: &str = r#"{"project_name": "Checkout", "problems": ["HTTP 500 errors"], "root_causes": ["leaked transaction exhausted the pool"], "solutions": ["restarted the pool"], "lessons_learned": ["alert on pool usage"]}"#;

// ─── Embedder ───────────────────────────────────────────────────────

/// Bag-of-words embedder: each lowercase word bumps one of [`DIMS`] buckets.
pub struct HashEmbedder;

pub fn hash_embedding(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let mut h: u32 = 2166136261;
        for b in word.to_lowercase().bytes() {
            h ^= b as u32;
            h = h.wrapping_mul(16777619);
        }
        v[(h as usize) % DIMS] += 1.0;
    }
    v
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-test"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| hash_embedding(t)).collect())
    }
}

// ─── Generation model ───────────────────────────────────────────────

/// Answers classification requests with a fixed reply and streams a fixed
/// list of fragments, optionally breaking after the last one. Summary
/// requests get the configured summary reply, or fail when there is none.
pub struct ScriptedModel {
    classification: String,
    summary: Option<String>,
    fragments: Vec<String>,
    break_after: bool,
    delay: Duration,
    streamed: Mutex<Vec<Prompt>>,
}

impl ScriptedModel {
    pub fn new(classification: &str, fragments: &[&str]) -> Self {
        Self {
            classification: classification.to_string(),
            summary: None,
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            break_after: false,
            delay: Duration::ZERO,
            streamed: Mutex::new(Vec::new()),
        }
    }

    /// Yield a network error once every fragment has been sent.
    pub fn breaking(mut self) -> Self {
        self.break_after = true;
        self
    }

    pub fn with_summary(mut self, reply: &str) -> Self {
        self.summary = Some(reply.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Prompts passed to `stream`, in call order.
    pub fn streamed_prompts(&self) -> Vec<Prompt> {
        self.streamed.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String, ProviderError> {
        if prompt.system == SUMMARY_INSTRUCTIONS {
            return self.summary.clone().ok_or(ProviderError::Disabled);
        }
        Ok(self.classification.clone())
    }

    async fn stream(&self, prompt: &Prompt) -> Result<FragmentStream, ProviderError> {
        self.streamed.lock().unwrap().push(prompt.clone());
        let mut items: Vec<Result<String, ProviderError>> =
            self.fragments.iter().cloned().map(Ok).collect();
        if self.break_after {
            items.push(Err(ProviderError::Network("connection reset".to_string())));
        }
        let delay = self.delay;
        let fragments = stream::unfold(items.into_iter(), move |mut items| async move {
            let item = items.next()?;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Some((item, items))
        });
        Ok(Box::pin(fragments))
    }
}

// ─── Environment ────────────────────────────────────────────────────

/// A temp directory holding `data/` for the database and `rcas/` for the
/// filesystem source.
pub fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    std::fs::create_dir_all(root.join("data")).unwrap();
    std::fs::create_dir_all(root.join("rcas")).unwrap();
    (tmp, root)
}

/// Configuration text for an environment created by [`setup_test_env`].
/// `extra` is appended verbatim.
pub fn config_text(root: &Path, extra: &str) -> String {
    format!(
        r#"[db]
path = "{root}/data/rca.sqlite"

[chunking]
window_tokens = 32
overlap_tokens = 4

[router]
timeout_secs = 5

[retrieval]
top_k = 5
min_score = 0.2

[server]
bind = "127.0.0.1:0"

[source]
kind = "filesystem"
root = "{root}/rcas"

{extra}
"#,
        root = root.display(),
        extra = extra
    )
}

pub fn test_config(root: &Path) -> Config {
    parse_config(&config_text(root, "[generation]\nretry_backoff_ms = 10\n")).unwrap()
}

pub fn write_rca(root: &Path, name: &str, body: &str) {
    std::fs::write(root.join("rcas").join(name), body).unwrap();
}

pub fn filesystem_source(config: &Config) -> Arc<dyn DocumentSource> {
    source_from_config(config).unwrap()
}

/// Build a runtime over `source` and `model` with a migrated database.
pub async fn runtime_with(
    config: &Config,
    source: Arc<dyn DocumentSource>,
    model: Arc<dyn GenerationModel>,
) -> Runtime {
    let pool = db::connect(config).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    Runtime::with_capabilities(
        config.clone(),
        pool,
        Capabilities {
            source,
            embedder: Arc::new(HashEmbedder),
            model,
        },
    )
}

/// Runtime over the configured filesystem source.
pub async fn test_runtime(config: &Config, model: Arc<dyn GenerationModel>) -> Runtime {
    runtime_with(config, filesystem_source(config), model).await
}

pub fn fs_source_for(config: &Config) -> FilesystemSource {
    match &config.source {
        rca_harness::config::SourceConfig::Filesystem(fs) => FilesystemSource::new(fs.clone()),
        rca_harness::config::SourceConfig::Gcs(_) => panic!("test config uses filesystem"),
    }
}

/// Poll `check` every 20ms for up to 5 seconds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..250 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not met within 5 seconds");
}
