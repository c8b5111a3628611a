//! # RCA Harness CLI (`rca`)
//!
//! ## Usage
//!
//! ```bash
//! rca --config ./config/rca.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rca init` | Create the SQLite database and run schema migrations |
//! | `rca sync` | Reconcile the index with the configured document source |
//! | `rca search "<query>"` | Print the ranked evidence for a query |
//! | `rca ask "<message>"` | Run one chat turn and stream the answer |
//! | `rca documents` | List indexed documents |
//! | `rca serve` | Start the HTTP server |
//!
//! Log verbosity is controlled with `RUST_LOG` (default `info`).

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use rca_harness::chat::ChatEvent;
use rca_harness::config::load_config;
use rca_harness::migrate;
use rca_harness::runtime::Runtime;
use rca_harness::server;

/// RCA Harness: a retrieval-augmented assistant over incident reports.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rca.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "rca",
    about = "RCA Harness: incident-report retrieval and conversational troubleshooting",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rca.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Reconcile the index with the document source.
    ///
    /// New and changed documents are extracted, chunked, embedded, and
    /// written; documents gone from the source are removed.
    Sync,

    /// Show the evidence retrieval would use for a query.
    Search {
        query: String,

        /// Maximum number of hits (defaults to `retrieval.top_k`).
        #[arg(long)]
        limit: Option<usize>,

        /// Minimum similarity (defaults to `retrieval.min_score`).
        #[arg(long)]
        min_score: Option<f64>,
    },

    /// Ask a question and stream the answer to stdout.
    Ask {
        message: String,

        /// Continue an existing session. A new one is created otherwise.
        #[arg(long)]
        session: Option<String>,
    },

    /// List indexed documents.
    Documents,

    /// Start the HTTP server.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&config).await?;
            println!("Database initialized at {}", config.db.path.display());
        }
        Commands::Sync => {
            let rt = Runtime::from_config(&config).await?;
            let report = rt.indexer.sync().await?;
            println!("sync {}", config.db.path.display());
            println!("  updated: {}", report.documents_updated);
            println!("  deleted: {}", report.documents_deleted);
            println!("  unchanged: {}", report.documents_unchanged);
            println!("  failed: {}", report.documents_failed);
            println!("  chunks written: {}", report.chunks_written);
            for failure in &report.failures {
                println!("    {}: {}", failure.uri, failure.reason);
            }
            println!("ok");
        }
        Commands::Search {
            query,
            limit,
            min_score,
        } => {
            let rt = Runtime::from_config(&config).await?;
            let k = limit.unwrap_or(config.retrieval.top_k);
            let min_score = min_score.unwrap_or(config.retrieval.min_score);
            let result = rt.retrieval.retrieve(&query, k, min_score).await;
            if result.is_empty() {
                println!("No results.");
            }
            for (i, hit) in result.hits.iter().enumerate() {
                println!(
                    "{}. [{:.2}] {} (chunk {})",
                    i + 1,
                    hit.score,
                    hit.source_uri,
                    hit.chunk_index
                );
                let snippet: String = hit.text.chars().take(200).collect();
                println!("   {}", snippet.replace('\n', " "));
            }
        }
        Commands::Ask { message, session } => {
            let rt = Runtime::from_config(&config).await?;
            let session_id = match session {
                Some(id) => id,
                None => rt.sessions.create_session(None).await?.id,
            };
            let cancel = CancellationToken::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    ctrl_c.cancel();
                }
            });

            let mut turn = rt.chat.start_turn(&session_id, &message, cancel);
            let mut stdout = std::io::stdout();
            let mut sources = Vec::new();
            while let Some(event) = turn.next().await {
                match event {
                    ChatEvent::Evidence(refs) => {
                        sources = refs.into_iter().map(|r| r.source_uri).collect();
                        sources.sort();
                        sources.dedup();
                        continue;
                    }
                    ChatEvent::Incomplete { .. } => tracing::warn!("answer incomplete"),
                    ChatEvent::Fragment(_) => {}
                }
                write!(stdout, "{}", event.into_text())?;
                stdout.flush()?;
            }
            println!();
            if !sources.is_empty() {
                eprintln!("sources: {}", sources.join(", "));
            }
            eprintln!("session: {}", session_id);
        }
        Commands::Documents => {
            let rt = Runtime::from_config(&config).await?;
            let docs = rt.index.documents().await?;
            if docs.is_empty() {
                println!("No documents indexed.");
            }
            for doc in docs {
                let project = doc
                    .summary
                    .as_ref()
                    .map(|s| format!("  [{}]", s.project_name))
                    .unwrap_or_default();
                println!(
                    "{}  {:<8} {:>4} chunks  {}{}",
                    doc.updated_at.format("%Y-%m-%d"),
                    doc.format.as_str(),
                    doc.chunk_count,
                    doc.source_uri,
                    project
                );
            }
        }
        Commands::Serve => {
            let rt = Runtime::from_config(&config).await?;
            server::run_server(Arc::new(rt)).await?;
        }
    }

    Ok(())
}
