//! # RCA Harness Core
//!
//! Shared, runtime-agnostic logic for RCA Harness: data models, the
//! overlapping-window chunker, the embedding and vector index traits,
//! result ranking, the strict intent and report-summary parsers, prompt
//! assembly, and the conversation store abstraction.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. Concrete
//! providers, the SQLite index, and the orchestration components live in
//! the `rca-harness` application crate.

pub mod chunk;
pub mod context;
pub mod conversation;
pub mod embedding;
pub mod error;
pub mod intent;
pub mod models;
pub mod rank;
pub mod store;
pub mod summary;
