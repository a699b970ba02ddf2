//! Pinecone-compatible HTTP [`VectorIndex`] and index factory.
//!
//! Talks to the index data plane over REST:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | upsert | `POST {host}/vectors/upsert` |
//! | query | `POST {host}/query` |
//! | delete namespace | `POST {host}/vectors/delete` with `deleteAll` |
//! | namespaces / count | `POST {host}/describe_index_stats` |
//!
//! Authentication is the `Api-Key` header.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use codebase_qa_core::models::{ScoredMatch, VectorMetadata, VectorRecord};
use codebase_qa_core::store::memory::InMemoryIndex;
use codebase_qa_core::store::{validate_namespace, IndexError, VectorIndex};

use crate::config::{api_key_from_env, IndexConfig};
use crate::http::{build_client, send_json, HttpFailure, RetryPolicy};

const API_VERSION: &str = "2024-07";

pub struct PineconeIndex {
    client: reqwest::Client,
    host: String,
    api_key: String,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct WireVector<'a> {
    id: &'a str,
    values: &'a [f32],
    metadata: &'a VectorMetadata,
}

#[derive(Deserialize)]
struct UpsertResponse {
    #[serde(rename = "upsertedCount", default)]
    upserted_count: Option<usize>,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<WireMatch>,
}

#[derive(Deserialize)]
struct WireMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: LenientMetadata,
}

/// Metadata as found in the index; records written by other tools may lack fields.
#[derive(Deserialize, Default)]
struct LenientMetadata {
    #[serde(default)]
    source_path: String,
    #[serde(default)]
    repo_id: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct StatsResponse {
    #[serde(default)]
    namespaces: HashMap<String, NamespaceStats>,
}

#[derive(Deserialize)]
struct NamespaceStats {
    #[serde(rename = "vectorCount", default)]
    vector_count: usize,
}

impl PineconeIndex {
    pub fn new(host: &str, api_key: String, timeout_secs: u64, retry: RetryPolicy) -> Result<Self> {
        let host = host.trim_end_matches('/');
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{}", host)
        };
        Ok(Self {
            client: build_client(timeout_secs)?,
            host,
            api_key,
            retry,
        })
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<serde_json::Value, IndexError> {
        let url = format!("{}{}", self.host, path);
        send_json(&self.retry, || {
            self.client
                .post(&url)
                .header("Api-Key", &self.api_key)
                .header("X-Pinecone-API-Version", API_VERSION)
                .json(&body)
        })
        .await
        .map_err(to_index_error)
    }

    async fn stats(&self) -> Result<StatsResponse, IndexError> {
        let json = self.post("/describe_index_stats", json!({})).await?;
        serde_json::from_value(json).map_err(|e| IndexError::InvalidResponse(e.to_string()))
    }
}

fn to_index_error(failure: HttpFailure) -> IndexError {
    match failure {
        HttpFailure::Transport(msg) => IndexError::Transport(msg),
        HttpFailure::Api { status, body } => IndexError::Api { status, body },
        HttpFailure::Decode(msg) => IndexError::InvalidResponse(msg),
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    fn name(&self) -> &str {
        "pinecone"
    }

    async fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<usize, IndexError> {
        validate_namespace(namespace)?;
        if records.is_empty() {
            return Ok(0);
        }
        let vectors: Vec<WireVector<'_>> = records
            .iter()
            .map(|r| WireVector {
                id: &r.id,
                values: &r.values,
                metadata: &r.metadata,
            })
            .collect();
        let json = self
            .post(
                "/vectors/upsert",
                json!({ "vectors": vectors, "namespace": namespace }),
            )
            .await?;
        // Some deployments answer an upsert with an empty body.
        let upserted = if json.is_null() {
            None
        } else {
            serde_json::from_value::<UpsertResponse>(json)
                .map_err(|e| IndexError::InvalidResponse(e.to_string()))?
                .upserted_count
        };
        Ok(upserted.unwrap_or(records.len()))
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredMatch>, IndexError> {
        validate_namespace(namespace)?;
        let json = self
            .post(
                "/query",
                json!({
                    "namespace": namespace,
                    "vector": vector,
                    "topK": top_k,
                    "includeMetadata": true,
                    "includeValues": false,
                }),
            )
            .await?;
        let parsed: QueryResponse = serde_json::from_value(json)
            .map_err(|e| IndexError::InvalidResponse(e.to_string()))?;

        let mut matches: Vec<ScoredMatch> = parsed
            .matches
            .into_iter()
            .map(|m| ScoredMatch {
                id: m.id,
                score: m.score,
                metadata: VectorMetadata {
                    source_path: m.metadata.source_path,
                    repo_id: m.metadata.repo_id,
                    text: m.metadata.text,
                },
            })
            .collect();
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<(), IndexError> {
        validate_namespace(namespace)?;
        match self
            .post(
                "/vectors/delete",
                json!({ "deleteAll": true, "namespace": namespace }),
            )
            .await
        {
            Ok(_) => Ok(()),
            // Serverless indexes answer 404 for a namespace that holds nothing.
            Err(IndexError::Api { status: 404, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn namespaces(&self) -> Result<Vec<String>, IndexError> {
        let stats = self.stats().await?;
        let mut names: Vec<String> = stats
            .namespaces
            .into_iter()
            .filter(|(name, s)| !name.is_empty() && s.vector_count > 0)
            .map(|(name, _)| name)
            .collect();
        names.sort();
        Ok(names)
    }

    async fn count(&self, namespace: &str) -> Result<usize, IndexError> {
        let stats = self.stats().await?;
        Ok(stats
            .namespaces
            .get(namespace)
            .map_or(0, |s| s.vector_count))
    }
}

/// Create the [`VectorIndex`] selected by `config.provider`.
pub fn create_index(config: &IndexConfig) -> Result<Arc<dyn VectorIndex>> {
    match config.provider.as_str() {
        "memory" => Ok(Arc::new(InMemoryIndex::new())),
        "pinecone" => {
            let host = config
                .host
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("index.host required for Pinecone provider"))?;
            let Some(api_key) = api_key_from_env(&config.api_key_env) else {
                bail!("{} environment variable not set", config.api_key_env);
            };
            Ok(Arc::new(PineconeIndex::new(
                host,
                api_key,
                config.timeout_secs,
                RetryPolicy::new(config.max_retries),
            )?))
        }
        other => bail!("Unknown index provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spawn_mock;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::Value;
    use std::sync::Mutex;
    use std::time::Duration;

    type Seen = Arc<Mutex<Vec<(String, Value)>>>;

    fn index(base: &str) -> PineconeIndex {
        PineconeIndex::new(
            base,
            "pk-test".to_string(),
            5,
            RetryPolicy::new(0).with_base_delay(Duration::from_millis(1)),
        )
        .unwrap()
    }

    fn mock(seen: Seen) -> Router {
        async fn record(
            path: &'static str,
            seen: &Seen,
            headers: &HeaderMap,
            body: Value,
        ) -> Result<(), StatusCode> {
            if headers.get("Api-Key").and_then(|v| v.to_str().ok()) != Some("pk-test") {
                return Err(StatusCode::UNAUTHORIZED);
            }
            seen.lock().unwrap().push((path.to_string(), body));
            Ok(())
        }

        Router::new()
            .route(
                "/vectors/upsert",
                post(|State(seen): State<Seen>, headers: HeaderMap, Json(body): Json<Value>| async move {
                    record("upsert", &seen, &headers, body.clone()).await?;
                    let n = body["vectors"].as_array().map_or(0, |v| v.len());
                    Ok::<_, StatusCode>(Json(json!({ "upsertedCount": n })))
                }),
            )
            .route(
                "/query",
                post(|State(seen): State<Seen>, headers: HeaderMap, Json(body): Json<Value>| async move {
                    record("query", &seen, &headers, body).await?;
                    Ok::<_, StatusCode>(Json(json!({
                        "matches": [
                            {"id": "a.rs#0", "score": 0.9,
                             "metadata": {"source_path": "a.rs", "repo_id": "repo_1", "text": "fn a"}},
                            {"id": "b.rs#0", "score": 0.5}
                        ],
                        "namespace": "repo_1"
                    })))
                }),
            )
            .route(
                "/vectors/delete",
                post(|State(seen): State<Seen>, headers: HeaderMap, Json(body): Json<Value>| async move {
                    record("delete", &seen, &headers, body.clone()).await?;
                    if body["namespace"] == "missing" {
                        return Err(StatusCode::NOT_FOUND);
                    }
                    Ok::<_, StatusCode>(Json(json!({})))
                }),
            )
            .route(
                "/describe_index_stats",
                post(|| async {
                    Json(json!({
                        "namespaces": {
                            "repo_2": {"vectorCount": 4},
                            "repo_1": {"vectorCount": 3},
                            "empty": {"vectorCount": 0}
                        },
                        "dimension": 2
                    }))
                }),
            )
            .with_state(seen)
    }

    fn record_for(id: &str) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            values: vec![1.0, 0.0],
            metadata: VectorMetadata {
                source_path: "a.rs".to_string(),
                repo_id: "repo_1".to_string(),
                text: "fn a".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_upsert_sends_namespace_and_metadata() {
        let seen: Seen = Arc::default();
        let base = spawn_mock(mock(seen.clone())).await;
        let n = index(&base)
            .upsert("repo_1", &[record_for("a.rs#0"), record_for("a.rs#1")])
            .await
            .unwrap();
        assert_eq!(n, 2);

        let seen = seen.lock().unwrap();
        let (path, body) = &seen[0];
        assert_eq!(path, "upsert");
        assert_eq!(body["namespace"], "repo_1");
        assert_eq!(body["vectors"][0]["metadata"]["source_path"], "a.rs");
    }

    #[tokio::test]
    async fn test_upsert_accepts_empty_body() {
        let app = Router::new().route("/vectors/upsert", post(|| async { StatusCode::OK }));
        let base = spawn_mock(app).await;
        let n = index(&base)
            .upsert("repo_1", &[record_for("a.rs#0"), record_for("a.rs#1")])
            .await
            .unwrap();
        assert_eq!(n, 2);
    }

    #[tokio::test]
    async fn test_query_parses_matches() {
        let seen: Seen = Arc::default();
        let base = spawn_mock(mock(seen.clone())).await;
        let hits = index(&base).query("repo_1", &[1.0, 0.0], 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].metadata.repo_id, "repo_1");
        assert_eq!(hits[1].metadata.source_path, "");

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].1["topK"], 5);
        assert_eq!(seen[0].1["includeMetadata"], true);
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_namespace() {
        let seen: Seen = Arc::default();
        let base = spawn_mock(mock(seen.clone())).await;
        let idx = index(&base);
        idx.delete_namespace("repo_1").await.unwrap();
        idx.delete_namespace("missing").await.unwrap();
        assert_eq!(seen.lock().unwrap()[0].1["deleteAll"], true);
    }

    #[tokio::test]
    async fn test_stats_namespaces_and_count() {
        let base = spawn_mock(mock(Arc::default())).await;
        let idx = index(&base);
        assert_eq!(idx.namespaces().await.unwrap(), vec!["repo_1", "repo_2"]);
        assert_eq!(idx.count("repo_2").await.unwrap(), 4);
        assert_eq!(idx.count("nope").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bad_key_is_api_error() {
        let base = spawn_mock(mock(Arc::default())).await;
        let idx = PineconeIndex::new(&base, "wrong".to_string(), 5, RetryPolicy::new(0)).unwrap();
        let err = idx.upsert("repo_1", &[record_for("x")]).await.unwrap_err();
        assert!(matches!(err, IndexError::Api { status: 401, .. }));
    }

    #[test]
    fn test_factory_defaults_to_memory() {
        let idx = create_index(&IndexConfig::default()).unwrap();
        assert_eq!(idx.name(), "memory");
    }
}
