//! Ingestion pipeline.
//!
//! Drives one repository through materialize → discover → chunk → embed →
//! upsert, reporting progress through its [`JobHandle`]:
//!
//! | Progress | Stage |
//! |----------|-------|
//! | 10 | working copy synced |
//! | 30 → 50 | files discovered and chunked |
//! | 60 → 80 | chunks embedded, batch by batch |
//! | 80 → 100 | vectors upserted into `namespace = repo_id` |
//!
//! Every external call is bounded by a timeout from `[timeouts]`. Any
//! stage failure ends the job in `Error` with a readable message.
//! Sub-batches that were upserted before a failure stay in the index;
//! re-ingesting overwrites them by id.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use codebase_qa_core::chunk::{split_document, ChunkingParams};
use codebase_qa_core::embedding::{ensure_batch_len, Embedder};
use codebase_qa_core::models::{Chunk, RepositoryRecord, VectorRecord};
use codebase_qa_core::store::VectorIndex;

use crate::config::{Config, IngestConfig, TimeoutConfig};
use crate::discovery::{DiscoveryStats, DocumentWalker};
use crate::error::IngestError;
use crate::jobs::JobHandle;
use crate::materialize::{cache_dir_for, Materializer};

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    pub files: usize,
    pub skipped_files: usize,
    pub chunks: usize,
    pub vectors: usize,
}

impl IngestSummary {
    pub fn message(&self) -> String {
        let mut msg = format!(
            "Indexed {} files ({} chunks, {} vectors)",
            self.files, self.chunks, self.vectors
        );
        if self.skipped_files > 0 {
            msg.push_str(&format!("; skipped {} unreadable files", self.skipped_files));
        }
        msg
    }
}

pub struct IngestionPipeline {
    materializer: Arc<dyn Materializer>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    cache_root: PathBuf,
    ingest: IngestConfig,
    chunking: ChunkingParams,
    embed_batch_size: usize,
    upsert_batch_size: usize,
    timeouts: TimeoutConfig,
}

impl IngestionPipeline {
    pub fn new(
        config: &Config,
        materializer: Arc<dyn Materializer>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            materializer,
            embedder,
            index,
            cache_root: config.storage.cache_dir.clone(),
            ingest: config.ingest.clone(),
            chunking: config.chunking.params(),
            embed_batch_size: config.embedding.batch_size.max(1),
            upsert_batch_size: config.index.upsert_batch_size.max(1),
            timeouts: config.timeouts.clone(),
        }
    }

    /// Run the job owned by `handle` to a terminal state.
    pub async fn run(&self, handle: JobHandle) {
        let record = handle.snapshot();
        handle.start(format!("Syncing {}", record.name));

        match self.execute(&handle, &record).await {
            Ok(summary) => {
                handle.complete(summary.message(), summary.files, summary.chunks);
            }
            Err(e) => handle.fail(e.to_string()),
        }
    }

    async fn execute(
        &self,
        handle: &JobHandle,
        record: &RepositoryRecord,
    ) -> Result<IngestSummary, IngestError> {
        // 1. Working copy
        let dest = cache_dir_for(&self.cache_root, record);
        let copy = bounded(
            "repository sync",
            self.timeouts.materialize_secs,
            self.materializer.sync(&record.url, &dest),
        )
        .await??;
        let branch_note = copy
            .branch
            .as_deref()
            .map(|b| format!(" (branch {})", b))
            .unwrap_or_default();
        handle.set_branch(copy.branch.clone());
        handle.progress(10, format!("Repository synced{}", branch_note));

        // 2. Discovery + chunking, off the async runtime
        handle.progress(30, "Reading and chunking files");
        let (chunks, stats) = self.discover_and_chunk(copy.path, &record.id).await?;
        if stats.selected == 0 {
            return Err(IngestError::NoDocuments {
                extensions: self.ingest.include_extensions.join(", "),
            });
        }
        if chunks.is_empty() {
            return Err(IngestError::NoChunks);
        }
        tracing::info!(
            repo_id = %record.id,
            files = stats.selected,
            skipped = stats.skipped,
            chunks = chunks.len(),
            "discovery complete"
        );
        let chunk_count = chunks.len();
        handle.progress(
            50,
            format!("Found {} files, {} chunks", stats.selected, chunk_count),
        );

        // 3. Embedding
        let records = self.embed_chunks(handle, chunks).await?;

        // 4. Upsert
        let vectors = self.upsert_records(handle, &record.id, &records).await?;

        Ok(IngestSummary {
            files: stats.selected,
            skipped_files: stats.skipped,
            chunks: chunk_count,
            vectors,
        })
    }

    async fn discover_and_chunk(
        &self,
        root: PathBuf,
        repo_id: &str,
    ) -> Result<(Vec<Chunk>, DiscoveryStats), IngestError> {
        let repo_id = repo_id.to_string();
        let ingest = self.ingest.clone();
        let params = self.chunking;

        tokio::task::spawn_blocking(move || -> Result<_, IngestError> {
            let mut walker = DocumentWalker::new(&root, &repo_id, &ingest)
                .map_err(|e| IngestError::Discovery(format!("{:#}", e)))?;
            let mut chunks = Vec::new();
            for doc in walker.by_ref() {
                chunks.extend(split_document(&doc, &params));
            }
            Ok((chunks, walker.stats()))
        })
        .await?
    }

    async fn embed_chunks(
        &self,
        handle: &JobHandle,
        chunks: Vec<Chunk>,
    ) -> Result<Vec<VectorRecord>, IngestError> {
        let total = chunks.len();
        let batches = total.div_ceil(self.embed_batch_size);
        let mut records = Vec::with_capacity(total);
        let mut pending = chunks.into_iter();

        for batch_no in 1..=batches {
            let batch: Vec<Chunk> = pending.by_ref().take(self.embed_batch_size).collect();
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();

            let vectors = bounded(
                "embedding",
                self.timeouts.embed_secs,
                self.embedder.embed(&texts),
            )
            .await??;
            ensure_batch_len(batch.len(), &vectors)?;

            records.extend(
                batch
                    .into_iter()
                    .zip(vectors)
                    .map(|(chunk, values)| VectorRecord::from_chunk(chunk, values)),
            );
            tracing::debug!(batch = batch_no, of = batches, "embedded batch");
            handle.progress(
                stage_progress(60, 80, batch_no, batches),
                format!("Embedded {}/{} chunks", records.len(), total),
            );
        }
        Ok(records)
    }

    async fn upsert_records(
        &self,
        handle: &JobHandle,
        namespace: &str,
        records: &[VectorRecord],
    ) -> Result<usize, IngestError> {
        let batches = records.len().div_ceil(self.upsert_batch_size);
        let mut committed = 0;

        for (i, batch) in records.chunks(self.upsert_batch_size).enumerate() {
            let written = bounded(
                "index upsert",
                self.timeouts.index_secs,
                self.index.upsert(namespace, batch),
            )
            .await?
            .map_err(|source| IngestError::Index { committed, source })?;
            committed += written;
            handle.progress(
                stage_progress(80, 100, i + 1, batches),
                format!("Stored {}/{} vectors", committed, records.len()),
            );
        }
        Ok(committed)
    }
}

/// Progress within `[start, end]` after `done` of `total` steps.
fn stage_progress(start: u8, end: u8, done: usize, total: usize) -> u8 {
    if total == 0 {
        return end;
    }
    let span = (end - start) as usize;
    start + (span * done.min(total) / total) as u8
}

async fn bounded<F: std::future::Future>(
    stage: &'static str,
    secs: u64,
    fut: F,
) -> Result<F::Output, IngestError> {
    tokio::time::timeout(Duration::from_secs(secs), fut)
        .await
        .map_err(|_| IngestError::Timeout { stage, secs })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_progress() {
        assert_eq!(stage_progress(60, 80, 0, 4), 60);
        assert_eq!(stage_progress(60, 80, 1, 4), 65);
        assert_eq!(stage_progress(60, 80, 4, 4), 80);
        assert_eq!(stage_progress(80, 100, 1, 3), 86);
        assert_eq!(stage_progress(80, 100, 0, 0), 100);
    }

    #[test]
    fn test_summary_message() {
        let s = IngestSummary {
            files: 3,
            skipped_files: 1,
            chunks: 4,
            vectors: 4,
        };
        assert_eq!(
            s.message(),
            "Indexed 3 files (4 chunks, 4 vectors); skipped 1 unreadable files"
        );
    }
}
