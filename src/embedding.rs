//! Embedding provider implementations.
//!
//! The [`Embedder`] trait and the local [`HashingEmbedder`] live in
//! `codebase-qa-core`. This module adds:
//! - **[`DisabledEmbedder`]**: every call fails; used when embeddings are turned off.
//! - **[`OpenAiEmbedder`]**: calls an OpenAI-compatible `POST /embeddings`
//!   endpoint with retry and backoff (see [`crate::http`]).
//!
//! Use [`create_embedder`] to pick one from configuration.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;

use codebase_qa_core::embedding::{ensure_batch_len, Embedder, EmbeddingError, HashingEmbedder};

use crate::config::{api_key_from_env, EmbeddingConfig};
use crate::http::{build_client, send_json, HttpFailure, RetryPolicy};

/// Embedder that always fails with [`EmbeddingError::Disabled`].
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::Disabled)
    }
}

/// Embedder for any OpenAI-compatible embeddings API.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dims: usize,
    api_key: String,
    retry: RetryPolicy,
}

impl OpenAiEmbedder {
    pub fn new(
        base_url: &str,
        model: &str,
        dims: usize,
        api_key: String,
        timeout_secs: u64,
        retry: RetryPolicy,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout_secs)?,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
            dims,
            api_key,
            retry,
        })
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let json = send_json(&self.retry, || {
            self.client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await
        .map_err(|e| match e {
            HttpFailure::Transport(msg) => EmbeddingError::Transport(msg),
            HttpFailure::Api { status, body } => EmbeddingError::Api { status, body },
            HttpFailure::Decode(msg) => EmbeddingError::InvalidResponse(msg),
        })?;

        let mut parsed: EmbeddingResponse = serde_json::from_value(json)
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        // Providers may return items out of order; `index` is authoritative.
        parsed.data.sort_by_key(|item| item.index);
        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|i| i.embedding).collect();

        ensure_batch_len(texts.len(), &vectors)?;
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dims) {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} dimensions, got {}",
                self.dims,
                bad.len()
            )));
        }
        Ok(vectors)
    }
}

/// Create the [`Embedder`] selected by `config.provider`.
///
/// | Config Value | Embedder |
/// |-------------|----------|
/// | `"hashing"` | [`HashingEmbedder`] |
/// | `"openai"` | [`OpenAiEmbedder`] |
/// | `"disabled"` | [`DisabledEmbedder`] |
///
/// # Errors
///
/// Unknown provider names, or `"openai"` without a model or an API key in
/// the configured environment variable.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "hashing" => Ok(Arc::new(HashingEmbedder::new(config.dims))),
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => {
            let model = config
                .model
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
            let Some(api_key) = api_key_from_env(&config.api_key_env) else {
                bail!("{} environment variable not set", config.api_key_env);
            };
            Ok(Arc::new(OpenAiEmbedder::new(
                &config.base_url,
                model,
                config.dims,
                api_key,
                config.timeout_secs,
                RetryPolicy::new(config.max_retries),
            )?))
        }
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spawn_mock;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn embedder(base: &str, dims: usize, retries: u32) -> OpenAiEmbedder {
        OpenAiEmbedder::new(
            base,
            "test-model",
            dims,
            "sk-test".to_string(),
            5,
            RetryPolicy::new(retries).with_base_delay(Duration::from_millis(5)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_reorders_by_index() {
        let app = Router::new().route(
            "/embeddings",
            post(|| async {
                Json(serde_json::json!({
                    "data": [
                        {"index": 1, "embedding": [0.0, 1.0]},
                        {"index": 0, "embedding": [1.0, 0.0]}
                    ]
                }))
            }),
        );
        let base = spawn_mock(app).await;
        let out = embedder(&base, 2, 0)
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(out, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn test_count_mismatch_is_an_error() {
        let app = Router::new().route(
            "/embeddings",
            post(|| async { Json(serde_json::json!({"data": [{"index": 0, "embedding": [1.0]}]})) }),
        );
        let base = spawn_mock(app).await;
        let err = embedder(&base, 1, 0)
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::CountMismatch {
                expected: 2,
                got: 1
            }
        ));
    }

    #[tokio::test]
    async fn test_retries_server_errors_but_not_client_errors() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        let app = Router::new().route(
            "/embeddings",
            post(|| async {
                if CALLS.fetch_add(1, Ordering::SeqCst) == 0 {
                    (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({})))
                } else {
                    (
                        StatusCode::OK,
                        Json(serde_json::json!({"data": [{"index": 0, "embedding": [1.0]}]})),
                    )
                }
            }),
        );
        let base = spawn_mock(app).await;
        let out = embedder(&base, 1, 2).embed(&["a".to_string()]).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(CALLS.load(Ordering::SeqCst), 2);

        let app = Router::new().route(
            "/embeddings",
            post(|| async { (StatusCode::UNAUTHORIZED, "bad key") }),
        );
        let base = spawn_mock(app).await;
        let err = embedder(&base, 1, 3).embed(&["a".to_string()]).await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Api { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_disabled_embedder_fails() {
        let err = DisabledEmbedder.embed(&["x".to_string()]).await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Disabled));
    }

    #[test]
    fn test_factory() {
        let config = EmbeddingConfig::default();
        let e = create_embedder(&config).unwrap();
        assert_eq!(e.model_name(), "hashing");
        assert_eq!(e.dims(), 384);

        let config = EmbeddingConfig {
            provider: "openai".to_string(),
            model: Some("m".to_string()),
            api_key_env: "CQA_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(create_embedder(&config).is_err());
    }
}
