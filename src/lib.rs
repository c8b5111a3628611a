//! # RCA Harness
//!
//! A retrieval-augmented troubleshooting assistant over a knowledge base of
//! incident reports (RCAs).
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────┐   ┌───────────┐
//! │  Source     │──▶│  Knowledge Indexer   │──▶│  SQLite   │
//! │  FS / GCS   │   │ extract+chunk+embed  │   │  index    │
//! └─────────────┘   └──────────────────────┘   └─────┬─────┘
//!                                                    │
//!   user turn ─▶ Router ─▶ Retrieval ─▶ Context ─▶ Generation ─▶ stream
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rca init                       # create database
//! rca sync                       # index the configured source
//! rca search "db pool exhausted" # inspect retrieval
//! rca ask "checkout is returning 500s"
//! rca serve                      # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`], [`migrate`] | Database connection and schema |
//! | [`sqlite_store`] | SQLite vector index |
//! | [`sessions`] | Chat sessions and history |
//! | [`sources`], [`connector_fs`], [`connector_gcs`] | Document sources |
//! | [`extract`] | Text extraction for txt, md, pdf, docx |
//! | [`provider`], [`embedding`], [`generation`] | Model providers |
//! | [`indexer`] | Source ↔ index reconciliation |
//! | [`summarizer`] | Report key-fact extraction |
//! | [`router`] | Intent classification |
//! | [`retrieval`] | Evidence retrieval |
//! | [`prompts`] | Persona instructions |
//! | [`chat`] | Turn orchestration |
//! | [`runtime`] | Component wiring |
//! | [`server`] | HTTP server |
//!
//! Runtime-agnostic pieces (models, chunker, ranking, intent parser,
//! context assembler) live in [`rca_harness_core`].

pub mod chat;
pub mod config;
pub mod connector_fs;
pub mod connector_gcs;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod generation;
pub mod indexer;
pub mod migrate;
pub mod prompts;
pub mod provider;
pub mod retrieval;
pub mod router;
pub mod runtime;
pub mod server;
pub mod sessions;
pub mod sources;
pub mod sqlite_store;
pub mod summarizer;

pub use rca_harness_core;
