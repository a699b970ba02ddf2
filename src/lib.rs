//! # Codebase Q&A
//!
//! Ingests source repositories into a per-repository namespaced vector
//! index and answers natural-language questions about the ingested code.
//!
//! ## Architecture
//!
//! ```text
//!  POST /api/ingest                      POST /api/chat
//!        │                                     │
//!        ▼                                     ▼
//! ┌─────────────┐  spawn   ┌──────────────┐  ┌──────────────────────┐
//! │ JobTracker  │─────────▶│  Ingestion   │  │    Orchestrator      │
//! │ (watch ch.) │◀─progress│  Pipeline    │  │ Plan→Retrieve→Augment│
//! └─────────────┘          └──────┬───────┘  │ →Reason→Review→Final │
//!                                 │          └──────────┬───────────┘
//!        git clone/fetch ◀────────┤                     │
//!        walk + chunk    ◀────────┤                     │
//!        embed (batched) ◀────────┤                     │
//!                                 ▼                     ▼
//!                      ┌──────────────────────────────────────┐
//!                      │ VectorIndex (namespace = repo id)    │
//!                      └──────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Ingestion and service error types |
//! | [`materialize`] | Git working-copy sync |
//! | [`discovery`] | File walking and filtering |
//! | [`embedding`] | Embedding providers |
//! | [`pinecone`] | Pinecone-compatible index and index factory |
//! | [`generation`] | Chat-completion generators |
//! | [`http`] | JSON-over-HTTP with retry and backoff |
//! | [`jobs`] | Job tracker and single-writer handles |
//! | [`ingest`] | Ingestion pipeline |
//! | [`augment`] | Issue / pull request lookups |
//! | [`orchestrator`] | Query stages |
//! | [`service`] | Operations behind the HTTP API and CLI |
//! | [`server`] | HTTP API |
//!
//! Data models, chunking, and the capability traits live in
//! `codebase-qa-core` and are re-exported here.

pub use codebase_qa_core::{chunk, models, store};

pub mod augment;
pub mod config;
pub mod discovery;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod http;
pub mod ingest;
pub mod jobs;
pub mod materialize;
pub mod orchestrator;
pub mod pinecone;
pub mod server;
pub mod service;

#[cfg(test)]
mod test_support;
