//! Shared JSON-over-HTTP plumbing for the provider adapters.
//!
//! Retry strategy, identical for every provider:
//! - HTTP 429 and 5xx → retry with exponential backoff
//! - other 4xx → fail immediately
//! - network errors → retry
//! - backoff: base, 2×base, 4×base, ... (exponent capped at 5)

use std::time::Duration;

use anyhow::Result;
use serde_json::Value;

/// Why a request ultimately failed.
#[derive(Debug, thiserror::Error)]
pub enum HttpFailure {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("invalid JSON body: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_secs(1),
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << (attempt - 1).min(5))
    }
}

pub fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(concat!("codebase-qa/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Send the request produced by `build`, retrying transient failures, and
/// decode the response body as JSON. An empty success body decodes to
/// `Value::Null`.
pub async fn send_json<F>(policy: &RetryPolicy, mut build: F) -> Result<Value, HttpFailure>
where
    F: FnMut() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            tokio::time::sleep(policy.delay(attempt)).await;
        }

        let response = match build().send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(attempt, error = %e, "request failed");
                last_err = Some(HttpFailure::Transport(e.to_string()));
                continue;
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.is_success() {
            if body.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&body).map_err(|e| HttpFailure::Decode(e.to_string()));
        }

        let failure = HttpFailure::Api {
            status: status.as_u16(),
            body,
        };
        if status.as_u16() == 429 || status.is_server_error() {
            tracing::debug!(attempt, status = status.as_u16(), "retryable API error");
            last_err = Some(failure);
            continue;
        }
        return Err(failure);
    }

    Err(last_err.unwrap_or_else(|| HttpFailure::Transport("request failed after retries".into())))
}
