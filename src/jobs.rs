//! In-process job tracker for repository ingestion.
//!
//! Each repository id maps to a `tokio::sync::watch` channel holding its
//! [`RepositoryRecord`]. The tracker keeps only the receiving side; the
//! sending side is owned by a [`JobHandle`], which is not `Clone`, so every
//! record has exactly one writer: the ingestion task that holds the handle.
//! Readers take cloned snapshots and never block the writer.
//!
//! State lives in memory for the lifetime of the process and is not
//! persisted.
//!
//! If a handle is dropped while its record is still `Queued` or `Indexing`
//! (the task panicked, was aborted, or returned early), `Drop` moves the
//! record to `Error`, so no job can stay "in progress" forever.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::AbortHandle;

use codebase_qa_core::models::{repo_id_for_url, RepoStatus, RepositoryRecord};

use crate::error::ServiceError;

struct Entry {
    rx: watch::Receiver<RepositoryRecord>,
    abort: Option<AbortHandle>,
}

impl Entry {
    fn snapshot(&self) -> RepositoryRecord {
        self.rx.borrow().clone()
    }

    fn status(&self) -> RepoStatus {
        self.rx.borrow().status
    }
}

/// Record counts by status, for health output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrackerCounts {
    pub total: usize,
    pub queued: usize,
    pub indexing: usize,
    pub indexed: usize,
    pub error: usize,
}

#[derive(Default)]
pub struct JobTracker {
    entries: RwLock<HashMap<String, Entry>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new `Queued` record for `url` and return its writer.
    ///
    /// The duplicate and quota checks happen under one write lock, so two
    /// concurrent requests for the same repository cannot both succeed.
    /// Records that are `Queued`, `Indexing` or `Indexed` all hold a quota
    /// slot, since each of them can end up `Indexed`.
    pub fn create(&self, url: &str, quota: usize) -> Result<JobHandle, ServiceError> {
        let id = repo_id_for_url(url);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        if entries.contains_key(&id) {
            return Err(ServiceError::DuplicateJob(id));
        }
        check_quota(&entries, None, quota)?;

        let record = RepositoryRecord::queued(url);
        let (handle, rx) = JobHandle::channel(record);
        entries.insert(id, Entry { rx, abort: None });
        Ok(handle)
    }

    /// Restart ingestion for a terminal record with a fresh lifecycle.
    ///
    /// The new record keeps the url and creation time; everything else
    /// starts over from `Queued`. The record itself is not counted against
    /// `quota`, so an `Indexed` repository can always be refreshed.
    pub fn resync(&self, id: &str, quota: usize) -> Result<JobHandle, ServiceError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let entry = entries
            .get(id)
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))?;
        let old = entry.snapshot();
        if !old.status.is_terminal() {
            return Err(ServiceError::DuplicateJob(id.to_string()));
        }
        check_quota(&entries, Some(id), quota)?;

        let mut record = RepositoryRecord::queued(&old.url);
        record.created_at = old.created_at;
        record.status_message = format!("Queued re-sync of {}", record.name);
        let (handle, rx) = JobHandle::channel(record);
        entries.insert(id.to_string(), Entry { rx, abort: None });
        Ok(handle)
    }

    /// Remember how to cancel the task running job `id`. Returns false if
    /// the record was removed in the meantime.
    pub fn attach_abort(&self, id: &str, abort: AbortHandle) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.get_mut(id) {
            Some(entry) => {
                entry.abort = Some(abort);
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self, id: &str) -> Option<RepositoryRecord> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(id).map(Entry::snapshot)
    }

    /// All records, oldest first.
    pub fn list(&self) -> Vec<RepositoryRecord> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut records: Vec<RepositoryRecord> = entries.values().map(Entry::snapshot).collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        records
    }

    /// Remove the record for `id`, aborting its task if one is running.
    /// Returns the last snapshot, or `None` if the id was unknown.
    pub fn remove(&self, id: &str) -> Option<RepositoryRecord> {
        let entry = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)?;
        if let Some(abort) = &entry.abort {
            abort.abort();
        }
        Some(entry.snapshot())
    }

    /// Abort the task running job `id`, keeping the record. Returns its
    /// current snapshot, or `None` if the id is unknown.
    ///
    /// An aborted job drops its handle, which moves the record to `Error`.
    pub fn cancel(&self, id: &str) -> Option<RepositoryRecord> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.get(id)?;
        if let Some(abort) = &entry.abort {
            abort.abort();
        }
        Some(entry.snapshot())
    }

    /// [`cancel`](Self::cancel) every job. Returns a snapshot of each record.
    pub fn cancel_all(&self) -> Vec<RepositoryRecord> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .values()
            .map(|entry| {
                if let Some(abort) = &entry.abort {
                    abort.abort();
                }
                entry.snapshot()
            })
            .collect()
    }

    pub fn counts(&self) -> TrackerCounts {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut counts = TrackerCounts {
            total: entries.len(),
            ..TrackerCounts::default()
        };
        for entry in entries.values() {
            match entry.status() {
                RepoStatus::Queued => counts.queued += 1,
                RepoStatus::Indexing => counts.indexing += 1,
                RepoStatus::Indexed => counts.indexed += 1,
                RepoStatus::Error => counts.error += 1,
            }
        }
        counts
    }

    /// Wait until the record for `id` is `Indexed` or `Error`.
    ///
    /// Returns `None` if the id is unknown.
    pub async fn wait_terminal(&self, id: &str) -> Option<RepositoryRecord> {
        let mut rx = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            entries.get(id)?.rx.clone()
        };
        let record = rx.wait_for(|r| r.status.is_terminal()).await.ok()?;
        Some(record.clone())
    }
}

/// Fail with `QuotaExceeded` if `quota` records other than `except` hold a
/// slot.
fn check_quota(
    entries: &HashMap<String, Entry>,
    except: Option<&str>,
    quota: usize,
) -> Result<(), ServiceError> {
    let occupied = entries
        .iter()
        .filter(|(id, _)| Some(id.as_str()) != except)
        .filter(|(_, e)| e.status() != RepoStatus::Error)
        .count();
    if occupied >= quota {
        return Err(ServiceError::QuotaExceeded { quota });
    }
    Ok(())
}

/// The single writer for one repository record.
pub struct JobHandle {
    id: String,
    tx: watch::Sender<RepositoryRecord>,
}

impl JobHandle {
    fn channel(record: RepositoryRecord) -> (Self, watch::Receiver<RepositoryRecord>) {
        let id = record.id.clone();
        let (tx, rx) = watch::channel(record);
        (Self { id, tx }, rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn snapshot(&self) -> RepositoryRecord {
        self.tx.borrow().clone()
    }

    /// Apply `update` if the state machine allows moving to `next`.
    fn transition(&self, next: RepoStatus, update: impl FnOnce(&mut RepositoryRecord)) -> bool {
        let mut applied = false;
        self.tx.send_if_modified(|record| {
            if !record.status.can_transition_to(next) {
                tracing::warn!(
                    repo_id = %record.id,
                    from = %record.status,
                    to = %next,
                    "ignoring invalid status transition"
                );
                return false;
            }
            record.status = next;
            update(record);
            applied = true;
            true
        });
        applied
    }

    /// `Queued → Indexing`.
    pub fn start(&self, message: impl Into<String>) {
        let message = message.into();
        if self.transition(RepoStatus::Indexing, |r| r.status_message = message) {
            tracing::info!(repo_id = %self.id, "ingestion started");
        }
    }

    /// Report progress while `Indexing`. Progress never moves backwards and
    /// is capped at 100.
    pub fn progress(&self, percent: u8, message: impl Into<String>) {
        let message = message.into();
        self.transition(RepoStatus::Indexing, |r| {
            r.progress = r.progress.max(percent.min(100));
            r.status_message = message;
        });
    }

    pub fn set_branch(&self, branch: Option<String>) {
        self.tx.send_modify(|r| r.branch = branch);
    }

    /// `Indexing → Indexed`, progress 100, `last_synced = now`.
    pub fn complete(self, summary: impl Into<String>, files: usize, chunks: usize) {
        let summary = summary.into();
        if self.transition(RepoStatus::Indexed, |r| {
            r.progress = 100;
            r.status_message = summary;
            r.last_synced = Some(Utc::now());
            r.files_indexed = files;
            r.chunks_indexed = chunks;
        }) {
            tracing::info!(repo_id = %self.id, files, chunks, "ingestion complete");
        }
    }

    /// Move to `Error` with `message`.
    pub fn fail(self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(repo_id = %self.id, error = %message, "ingestion failed");
        self.transition(RepoStatus::Error, |r| r.status_message = message);
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        if !self.tx.borrow().status.is_terminal() {
            self.transition(RepoStatus::Error, |r| {
                r.status_message = "Ingestion task ended unexpectedly".to_string();
            });
        }
    }
}
