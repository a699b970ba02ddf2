//! In-memory [`VectorIndex`] implementation for development and testing.
//!
//! Uses nested `HashMap`s (namespace → id → vector) behind
//! `std::sync::RwLock`. Query is brute-force cosine similarity over the
//! target namespace only.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{ScoredMatch, VectorMetadata, VectorRecord};

use super::{validate_namespace, IndexError, VectorIndex};

struct StoredVector {
    values: Vec<f32>,
    metadata: VectorMetadata,
}

/// In-memory namespaced vector index.
#[derive(Default)]
pub struct InMemoryIndex {
    namespaces: RwLock<HashMap<String, HashMap<String, StoredVector>>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<usize, IndexError> {
        validate_namespace(namespace)?;
        let mut guard = self.namespaces.write().unwrap_or_else(PoisonError::into_inner);

        // Validate the whole batch before touching anything so the call is atomic.
        let existing_dims = guard
            .get(namespace)
            .and_then(|ns| ns.values().next())
            .map(|sv| sv.values.len());
        let expected = existing_dims.or_else(|| records.first().map(|r| r.values.len()));
        if let Some(expected) = expected {
            if let Some(bad) = records.iter().find(|r| r.values.len() != expected) {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    got: bad.values.len(),
                });
            }
        }

        let ns = guard.entry(namespace.to_string()).or_default();
        for record in records {
            ns.insert(
                record.id.clone(),
                StoredVector {
                    values: record.values.clone(),
                    metadata: record.metadata.clone(),
                },
            );
        }
        Ok(records.len())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredMatch>, IndexError> {
        validate_namespace(namespace)?;
        let guard = self.namespaces.read().unwrap_or_else(PoisonError::into_inner);
        let Some(ns) = guard.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut matches: Vec<ScoredMatch> = ns
            .iter()
            .map(|(id, sv)| ScoredMatch {
                id: id.clone(),
                score: cosine_similarity(vector, &sv.values),
                metadata: sv.metadata.clone(),
            })
            .collect();
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<(), IndexError> {
        validate_namespace(namespace)?;
        self.namespaces
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(namespace);
        Ok(())
    }

    async fn namespaces(&self) -> Result<Vec<String>, IndexError> {
        let guard = self.namespaces.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = guard
            .iter()
            .filter(|(_, ns)| !ns.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn count(&self, namespace: &str) -> Result<usize, IndexError> {
        let guard = self.namespaces.read().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.get(namespace).map_or(0, HashMap::len))
    }
}
