//! Namespaced vector index abstraction.
//!
//! The [`VectorIndex`] trait is the boundary to the vector store. Every
//! operation is scoped to a namespace (one per ingested repository), which
//! is what isolates repositories from each other at query time.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`upsert`](VectorIndex::upsert) | Idempotent overwrite of records by id within a namespace |
//! | [`query`](VectorIndex::query) | Top-k nearest neighbors within one namespace |
//! | [`delete_namespace`](VectorIndex::delete_namespace) | Remove every record in a namespace |
//! | [`namespaces`](VectorIndex::namespaces) | List non-empty namespaces |
//! | [`count`](VectorIndex::count) | Number of records in a namespace |
//!
//! Callers split large payloads into sub-batches before calling
//! [`upsert`](VectorIndex::upsert); each call commits on its own, so a
//! failed call never undoes an earlier one.

pub mod memory;

use async_trait::async_trait;

use crate::models::{ScoredMatch, VectorRecord};

/// Failure of a single index call.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("index transport error: {0}")]
    Transport(String),

    #[error("index API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("invalid index response: {0}")]
    InvalidResponse(String),

    #[error("invalid namespace: {0:?}")]
    InvalidNamespace(String),

    #[error("vector has {got} dimensions, namespace expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("index call timed out after {0}s")]
    Timeout(u64),
}

/// Abstract namespaced vector store.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Backend label used in logs and health output.
    fn name(&self) -> &str;

    /// Insert or overwrite `records` by id within `namespace`.
    ///
    /// The call is atomic: either every record is written or none is.
    /// Returns the number of records written.
    async fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<usize, IndexError>;

    /// Return at most `top_k` records of `namespace`, best match first.
    ///
    /// Never returns records from any other namespace.
    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredMatch>, IndexError>;

    /// Remove every record in `namespace`. Deleting an unknown namespace
    /// is not an error.
    async fn delete_namespace(&self, namespace: &str) -> Result<(), IndexError>;

    /// List namespaces that currently hold at least one record.
    async fn namespaces(&self) -> Result<Vec<String>, IndexError>;

    /// Number of records stored in `namespace`.
    async fn count(&self, namespace: &str) -> Result<usize, IndexError>;
}

/// Reject empty namespaces before they reach a backend, where an empty
/// string usually means "the default namespace" and would break isolation.
pub fn validate_namespace(namespace: &str) -> Result<(), IndexError> {
    if namespace.trim().is_empty() {
        return Err(IndexError::InvalidNamespace(namespace.to_string()));
    }
    Ok(())
}
