//! Repository service: the operations exposed to HTTP handlers and the CLI.
//!
//! [`RepoService`] owns the job tracker, the ingestion pipeline, and the
//! query orchestrator, and enforces the preconditions around them (quota,
//! one active job per repository, queries only against `Indexed`
//! repositories).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;

use codebase_qa_core::embedding::Embedder;
use codebase_qa_core::generation::Generator;
use codebase_qa_core::models::{RepoStatus, RepositoryRecord};
use codebase_qa_core::store::{IndexError, VectorIndex};

use crate::augment::{AuxiliarySource, GitHubSource, NoAuxiliarySource};
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::error::ServiceError;
use crate::generation::create_generator;
use crate::ingest::IngestionPipeline;
use crate::jobs::{JobHandle, JobTracker, TrackerCounts};
use crate::materialize::{cache_dir_for, GitMaterializer, Materializer};
use crate::orchestrator::{FinalOutput, Orchestrator, ReviewPolicy};
use crate::pinecone::create_index;

/// The external capabilities a service is wired with.
pub struct Capabilities {
    pub materializer: Arc<dyn Materializer>,
    pub embedder: Arc<dyn Embedder>,
    pub index: Arc<dyn VectorIndex>,
    pub generator: Arc<dyn Generator>,
    pub auxiliary: Arc<dyn AuxiliarySource>,
}

impl Capabilities {
    /// Build the adapters selected by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let auxiliary: Arc<dyn AuxiliarySource> = if config.github.enabled {
            Arc::new(GitHubSource::new(&config.github)?)
        } else {
            Arc::new(NoAuxiliarySource)
        };
        Ok(Self {
            materializer: Arc::new(GitMaterializer::new(config.ingest.shallow_clone)),
            embedder: create_embedder(&config.embedding)?,
            index: create_index(&config.index)?,
            generator: create_generator(&config.generation)?,
            auxiliary,
        })
    }
}

/// Immediate reply to an ingestion request.
#[derive(Debug, Clone, Serialize)]
pub struct IngestAccepted {
    pub status: RepoStatus,
    pub repo_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub version: &'static str,
    pub repositories: TrackerCounts,
    pub quota: usize,
    pub index: String,
    pub embedder: String,
    pub generator: String,
}

pub struct RepoService {
    config: Config,
    tracker: Arc<JobTracker>,
    pipeline: Arc<IngestionPipeline>,
    orchestrator: Orchestrator,
    index: Arc<dyn VectorIndex>,
    embedder_name: String,
    generator_name: String,
}

impl RepoService {
    pub fn new(config: Config, caps: Capabilities) -> Self {
        let pipeline = IngestionPipeline::new(
            &config,
            caps.materializer,
            caps.embedder.clone(),
            caps.index.clone(),
        );
        let orchestrator = Orchestrator::new(
            &config,
            caps.generator.clone(),
            caps.embedder.clone(),
            caps.index.clone(),
        )
        .with_auxiliary(caps.auxiliary);

        Self {
            embedder_name: caps.embedder.model_name().to_string(),
            generator_name: caps.generator.name().to_string(),
            config,
            tracker: Arc::new(JobTracker::new()),
            pipeline: Arc::new(pipeline),
            orchestrator,
            index: caps.index,
        }
    }

    pub fn from_config(config: Config) -> Result<Self> {
        let caps = Capabilities::from_config(&config)?;
        Ok(Self::new(config, caps))
    }

    /// Replace the review policy used by the Review stage.
    pub fn with_review_policy(mut self, policy: Arc<dyn ReviewPolicy>) -> Self {
        self.orchestrator = self.orchestrator.with_review_policy(policy);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Register a repository and start ingesting it in the background.
    pub fn create_ingestion(&self, repo_url: &str) -> Result<IngestAccepted, ServiceError> {
        let url = repo_url.trim();
        if url.is_empty() {
            return Err(ServiceError::InvalidRequest(
                "repo_url must not be empty".to_string(),
            ));
        }

        let handle = self.tracker.create(url, self.config.ingest.quota)?;
        let record = handle.snapshot();
        tracing::info!(repo_id = %record.id, url = %record.url, "ingestion queued");
        self.spawn_job(handle);

        Ok(IngestAccepted {
            status: record.status,
            repo_id: record.id,
            message: record.status_message,
        })
    }

    /// Re-ingest a repository whose previous job has finished.
    pub fn resync(&self, id: &str) -> Result<IngestAccepted, ServiceError> {
        let handle = self.tracker.resync(id, self.config.ingest.quota)?;
        let record = handle.snapshot();
        tracing::info!(repo_id = %record.id, "re-sync queued");
        self.spawn_job(handle);

        Ok(IngestAccepted {
            status: record.status,
            repo_id: record.id,
            message: record.status_message,
        })
    }

    fn spawn_job(&self, handle: JobHandle) {
        let id = handle.id().to_string();
        let pipeline = self.pipeline.clone();
        let task = tokio::spawn(async move { pipeline.run(handle).await });
        if !self.tracker.attach_abort(&id, task.abort_handle()) {
            task.abort();
        }
    }

    pub fn list(&self) -> Vec<RepositoryRecord> {
        self.tracker.list()
    }

    pub fn get(&self, id: &str) -> Result<RepositoryRecord, ServiceError> {
        self.tracker
            .snapshot(id)
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))
    }

    /// Remove a repository: any running job, its vectors, its cached
    /// working copy, and finally its record.
    ///
    /// The record is dropped only after the namespace delete succeeds, so a
    /// failed delete can be retried with the same id.
    pub async fn delete(&self, id: &str) -> Result<RepositoryRecord, ServiceError> {
        let record = self
            .tracker
            .cancel(id)
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))?;

        self.delete_namespace(id).await?;
        let record = self.tracker.remove(id).unwrap_or(record);
        remove_cache(&cache_dir_for(&self.config.storage.cache_dir, &record)).await;
        tracing::info!(repo_id = %id, "repository deleted");
        Ok(record)
    }

    /// Delete every namespace known to the index or the tracker, then drop
    /// the records. Returns the namespaces deleted.
    ///
    /// On an index failure the records whose namespaces were not yet
    /// deleted stay in the tracker.
    pub async fn clear_all(&self) -> Result<Vec<String>, ServiceError> {
        let records = self.tracker.cancel_all();
        let mut namespaces = self.index_call(self.index.namespaces()).await?;
        for record in &records {
            if !namespaces.contains(&record.id) {
                namespaces.push(record.id.clone());
            }
        }
        namespaces.sort();

        for ns in &namespaces {
            self.delete_namespace(ns).await?;
            if let Some(record) = self.tracker.remove(ns) {
                remove_cache(&cache_dir_for(&self.config.storage.cache_dir, &record)).await;
            }
        }
        tracing::info!(count = namespaces.len(), "cleared all repositories");
        Ok(namespaces)
    }

    /// Answer `question` about repository `repo_id`.
    ///
    /// Fails with `NotFound` or `NotReady` before any stage runs.
    pub async fn query(&self, repo_id: &str, question: &str) -> Result<FinalOutput, ServiceError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ServiceError::InvalidRequest(
                "question must not be empty".to_string(),
            ));
        }
        let record = self.get(repo_id)?;
        if record.status != RepoStatus::Indexed {
            return Err(ServiceError::NotReady {
                id: record.id,
                status: record.status,
            });
        }
        Ok(self
            .orchestrator
            .answer(question, &record.id, &record.url)
            .await)
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            repositories: self.tracker.counts(),
            quota: self.config.ingest.quota,
            index: self.index.name().to_string(),
            embedder: self.embedder_name.clone(),
            generator: self.generator_name.clone(),
        }
    }

    /// Wait for the job of `id` to reach `Indexed` or `Error`.
    pub async fn wait_for(&self, id: &str) -> Result<RepositoryRecord, ServiceError> {
        self.tracker
            .wait_terminal(id)
            .await
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))
    }

    /// Number of vectors stored for `id`.
    pub async fn vector_count(&self, id: &str) -> Result<usize, ServiceError> {
        self.index_call(self.index.count(id)).await
    }

    async fn delete_namespace(&self, ns: &str) -> Result<(), ServiceError> {
        self.index_call(self.index.delete_namespace(ns)).await
    }

    async fn index_call<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, IndexError>>,
    ) -> Result<T, ServiceError> {
        let secs = self.config.timeouts.index_secs;
        match tokio::time::timeout(Duration::from_secs(secs), fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(IndexError::Timeout(secs).into()),
        }
    }
}

async fn remove_cache(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "removed cached working copy"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "could not remove cache"),
    }
}
