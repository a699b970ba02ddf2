//! # Codebase Q&A Core
//!
//! Shared, I/O-free logic for Codebase Q&A: repository records and their
//! status machine, the sliding-window chunker, the namespaced vector index
//! trait with an in-memory implementation, and the embedding and generation
//! capability traits.
//!
//! This crate contains no tokio runtime, HTTP client, git or filesystem
//! access. Concrete network adapters live in the `codebase-qa` app crate.

pub mod chunk;
pub mod embedding;
pub mod generation;
pub mod models;
pub mod store;
