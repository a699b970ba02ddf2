//! Error taxonomy for the app crate.
//!
//! Capability errors (`EmbeddingError`, `IndexError`, `GenerationError`)
//! live in `codebase-qa-core`. This module adds the errors owned by the
//! ingestion pipeline and the service layer.

use codebase_qa_core::embedding::EmbeddingError;
use codebase_qa_core::models::RepoStatus;
use codebase_qa_core::store::IndexError;

/// Failure to obtain or refresh a local working copy.
#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    #[error("git executable not found; is git installed?")]
    GitNotFound,

    #[error("git clone of {url} failed: {stderr}")]
    Clone { url: String, stderr: String },

    #[error("git {step} failed in {path}: {stderr}")]
    Command {
        step: &'static str,
        path: String,
        stderr: String,
    },

    #[error("cache directory error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Stage-level failure of an ingestion job. Always becomes a terminal
/// `Error` status on the job's record.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("could not materialize repository: {0}")]
    Materialize(#[from] MaterializeError),

    #[error("file discovery failed: {0}")]
    Discovery(String),

    #[error("No indexable files found in repository (looked for: {extensions})")]
    NoDocuments { extensions: String },

    #[error("Indexable files were found but contained no text to index")]
    NoChunks,

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("index upsert failed after {committed} vectors were stored: {source}")]
    Index {
        committed: usize,
        #[source]
        source: IndexError,
    },

    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: &'static str, secs: u64 },

    #[error("file discovery task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Errors surfaced by [`RepoService`](crate::service::RepoService) to its
/// callers (HTTP handlers and the CLI).
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Repository limit reached ({quota} indexed or in progress). Delete a repository first.")]
    QuotaExceeded { quota: usize },

    #[error("An ingestion job for {0} already exists")]
    DuplicateJob(String),

    #[error("Repository not found: {0}")]
    NotFound(String),

    #[error("Repository {id} is not ready (status: {status})")]
    NotReady { id: String, status: RepoStatus },

    #[error("{0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<IndexError> for ServiceError {
    fn from(err: IndexError) -> Self {
        ServiceError::Internal(anyhow::Error::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_readable() {
        let err = IngestError::NoDocuments {
            extensions: "rs, py".to_string(),
        };
        assert!(err.to_string().starts_with("No indexable files found"));

        let err = ServiceError::NotReady {
            id: "repo_abc".to_string(),
            status: RepoStatus::Indexing,
        };
        assert_eq!(
            err.to_string(),
            "Repository repo_abc is not ready (status: Indexing)"
        );
    }

    #[test]
    fn test_materialize_error_converts() {
        let err: IngestError = MaterializeError::GitNotFound.into();
        assert!(err.to_string().contains("git executable not found"));
    }
}
