//! Core data models used throughout Codebase Q&A.
//!
//! These types represent the repository records tracked by the job tracker
//! and the documents, chunks, and vectors that flow through the ingestion
//! and retrieval pipelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Lifecycle status of a repository ingestion job.
///
/// `Queued` and `Indexing` are transient; `Indexed` and `Error` are terminal.
/// Valid transitions are `Queued → Indexing → {Indexed, Error}`, plus the
/// failure shortcut `Queued → Error` for jobs that die before starting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RepoStatus {
    Queued,
    Indexing,
    Indexed,
    Error,
}

impl RepoStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RepoStatus::Indexed | RepoStatus::Error)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// Staying in `Indexing` is allowed (progress updates); every other
    /// self-transition is rejected.
    pub fn can_transition_to(self, next: RepoStatus) -> bool {
        use RepoStatus::*;
        matches!(
            (self, next),
            (Queued, Indexing)
                | (Queued, Error)
                | (Indexing, Indexing)
                | (Indexing, Indexed)
                | (Indexing, Error)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RepoStatus::Queued => "Queued",
            RepoStatus::Indexing => "Indexing",
            RepoStatus::Indexed => "Indexed",
            RepoStatus::Error => "Error",
        }
    }
}

impl std::fmt::Display for RepoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ingested (or ingesting) repository, as tracked by the job tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub id: String,
    pub name: String,
    pub url: String,
    /// Checked-out branch, known once the working copy is materialized.
    pub branch: Option<String>,
    pub status: RepoStatus,
    /// Percentage in `0..=100`.
    pub progress: u8,
    pub status_message: String,
    pub created_at: DateTime<Utc>,
    pub last_synced: Option<DateTime<Utc>>,
    pub files_indexed: usize,
    pub chunks_indexed: usize,
}

impl RepositoryRecord {
    /// Create a fresh `Queued` record for `url`.
    ///
    /// The id and name are derived from the URL with [`repo_id_for_url`]
    /// and [`repo_name_from_url`].
    pub fn queued(url: &str) -> Self {
        let name = repo_name_from_url(url);
        Self {
            id: repo_id_for_url(url),
            url: normalize_repo_url(url),
            status_message: format!("Queued ingestion of {}", name),
            name,
            branch: None,
            status: RepoStatus::Queued,
            progress: 0,
            created_at: Utc::now(),
            last_synced: None,
            files_indexed: 0,
            chunks_indexed: 0,
        }
    }
}

/// Canonical form of a repository URL.
///
/// Trims whitespace, trailing slashes and a trailing `.git`, and lowercases
/// the scheme and host so that trivially different spellings of the same
/// remote map to one repository.
pub fn normalize_repo_url(url: &str) -> String {
    let mut trimmed = url.trim().trim_end_matches('/');
    if let Some(stripped) = trimmed.strip_suffix(".git") {
        trimmed = stripped.trim_end_matches('/');
    }

    match trimmed.split_once("://") {
        Some((scheme, rest)) => {
            let (host, path) = match rest.find('/') {
                Some(pos) => rest.split_at(pos),
                None => (rest, ""),
            };
            format!(
                "{}://{}{}",
                scheme.to_ascii_lowercase(),
                host.to_ascii_lowercase(),
                path
            )
        }
        None => trimmed.to_string(),
    }
}

/// Deterministic repository id: `repo_` + the first 12 hex digits of the
/// SHA-256 of the normalized URL.
pub fn repo_id_for_url(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_repo_url(url).as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("repo_{}", &digest[..12])
}

/// Human-readable repository name: the last path segment of the URL.
pub fn repo_name_from_url(url: &str) -> String {
    normalize_repo_url(url)
        .rsplit(['/', ':'])
        .find(|segment| !segment.is_empty())
        .unwrap_or("repository")
        .to_string()
}

/// A source file read from a working copy. Never persisted.
#[derive(Debug, Clone)]
pub struct Document {
    /// Path relative to the working-copy root, `/`-separated.
    pub path: String,
    pub raw_text: String,
    pub repo_id: String,
}

/// A window of a document's text; the unit of embedding and indexing.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Unique within the repository namespace (see [`crate::chunk::chunk_id`]).
    pub id: String,
    pub text: String,
    pub source_path: String,
    pub repo_id: String,
    pub sequence_index: usize,
}

/// Metadata stored alongside every vector in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub source_path: String,
    pub repo_id: String,
    pub text: String,
}

/// A vector ready to be upserted into a namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: VectorMetadata,
}

impl VectorRecord {
    pub fn from_chunk(chunk: Chunk, values: Vec<f32>) -> Self {
        Self {
            id: chunk.id,
            values,
            metadata: VectorMetadata {
                source_path: chunk.source_path,
                repo_id: chunk.repo_id,
                text: chunk.text,
            },
        }
    }
}

/// A nearest-neighbor hit returned by an index query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredMatch {
    pub id: String,
    pub score: f32,
    pub metadata: VectorMetadata,
}
