//! Wiring of capabilities into the orchestration components.
//!
//! Provider clients are built once here, at the process entry point, and
//! injected into each component. Tests supply their own [`Capabilities`].

use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;

use rca_harness_core::embedding::Embedder;
use rca_harness_core::store::VectorIndex;

use crate::chat::ChatService;
use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::generation::{create_model, GenerationModel, GenerationStreamer};
use crate::indexer::KnowledgeIndexer;
use crate::migrate;
use crate::retrieval::RetrievalEngine;
use crate::router::IntentRouter;
use crate::sessions::SqliteConversationStore;
use crate::sources::{source_from_config, DocumentSource};
use crate::sqlite_store::SqliteIndex;
use crate::summarizer::ReportSummarizer;

/// External collaborators the components are built from.
pub struct Capabilities {
    pub source: Arc<dyn DocumentSource>,
    pub embedder: Arc<dyn Embedder>,
    pub model: Arc<dyn GenerationModel>,
}

impl Capabilities {
    /// Build the configured source and provider clients.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            source: source_from_config(config)?,
            embedder: create_embedder(&config.embedding)?,
            model: create_model(&config.generation)?,
        })
    }
}

/// Every long-lived component of a running instance.
pub struct Runtime {
    pub config: Arc<Config>,
    pub index: Arc<dyn VectorIndex>,
    pub sessions: Arc<SqliteConversationStore>,
    pub indexer: Arc<KnowledgeIndexer>,
    pub retrieval: Arc<RetrievalEngine>,
    pub chat: Arc<ChatService>,
}

impl Runtime {
    /// Open the database, apply migrations, and build the configured providers.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        let capabilities = Capabilities::from_config(config)?;
        Ok(Self::with_capabilities(config.clone(), pool, capabilities))
    }

    pub fn with_capabilities(config: Config, pool: SqlitePool, caps: Capabilities) -> Self {
        let index: Arc<dyn VectorIndex> = Arc::new(SqliteIndex::new(pool.clone()));
        let sessions = Arc::new(SqliteConversationStore::new(pool));

        let summarizer = config
            .summary
            .enabled
            .then(|| ReportSummarizer::new(caps.model.clone(), &config.summary));
        let indexer = Arc::new(KnowledgeIndexer::new(
            caps.source,
            caps.embedder.clone(),
            index.clone(),
            config.chunking.clone(),
            summarizer,
        ));
        let retrieval = Arc::new(RetrievalEngine::new(
            caps.embedder,
            index.clone(),
            config.retrieval.clone(),
        ));
        let chat = Arc::new(ChatService::new(
            sessions.clone(),
            IntentRouter::new(caps.model.clone(), &config.router),
            retrieval.clone(),
            GenerationStreamer::from_config(caps.model, &config.generation),
            config.context.clone(),
        ));

        Self {
            config: Arc::new(config),
            index,
            sessions,
            indexer,
            retrieval,
            chat,
        }
    }
}
