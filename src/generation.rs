//! Chat-completion generators.
//!
//! [`OpenAiGenerator`] speaks the OpenAI chat-completions protocol, which
//! Groq, OpenAI, and most local servers accept. The default endpoint and
//! model point at Groq.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;

use codebase_qa_core::generation::{GenerationError, Generator, OfflineGenerator, Prompt};

use crate::config::{api_key_from_env, GenerationConfig};
use crate::http::{build_client, send_json, HttpFailure, RetryPolicy};

pub struct OpenAiGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    api_key: String,
    retry: RetryPolicy,
}

impl OpenAiGenerator {
    pub fn new(config: &GenerationConfig, api_key: String, retry: RetryPolicy) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            endpoint: format!(
                "{}/chat/completions",
                config.base_url.trim_end_matches('/')
            ),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            api_key,
            retry,
        })
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String, GenerationError> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.user},
            ],
        });

        let json = send_json(&self.retry, || {
            self.client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await
        .map_err(|e| match e {
            HttpFailure::Transport(msg) => GenerationError::Transport(msg),
            HttpFailure::Api { status, body } => GenerationError::Api { status, body },
            HttpFailure::Decode(msg) => GenerationError::Transport(msg),
        })?;

        let parsed: ChatResponse = serde_json::from_value(json)
            .map_err(|_| GenerationError::EmptyResponse(self.model.clone()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GenerationError::EmptyResponse(self.model.clone()))
    }
}

/// Create the [`Generator`] selected by `config.provider`.
///
/// A missing API key is not an error: the pipeline falls back to the
/// [`OfflineGenerator`] and logs a warning, so queries still complete.
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "offline" => Ok(Arc::new(OfflineGenerator)),
        "openai" => match api_key_from_env(&config.api_key_env) {
            Some(key) => Ok(Arc::new(OpenAiGenerator::new(
                config,
                key,
                RetryPolicy::new(config.max_retries),
            )?)),
            None => {
                tracing::warn!(
                    env = %config.api_key_env,
                    "no generation API key configured, using offline generator"
                );
                Ok(Arc::new(OfflineGenerator))
            }
        },
        other => bail!("Unknown generation provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spawn_mock;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    fn generator(base: &str) -> OpenAiGenerator {
        let config = GenerationConfig {
            base_url: base.to_string(),
            model: "test-model".to_string(),
            ..GenerationConfig::default()
        };
        OpenAiGenerator::new(&config, "gk".to_string(), RetryPolicy::new(0)).unwrap()
    }

    #[tokio::test]
    async fn test_sends_system_and_user_messages() {
        let app = Router::new().route(
            "/chat/completions",
            post(|Json(body): Json<Value>| async move {
                let echo = format!(
                    "{}|{}|{}",
                    body["messages"][0]["content"].as_str().unwrap_or(""),
                    body["messages"][1]["content"].as_str().unwrap_or(""),
                    body["temperature"]
                );
                Json(json!({"choices": [{"message": {"role": "assistant", "content": echo}}]}))
            }),
        );
        let base = spawn_mock(app).await;
        let out = generator(&base)
            .complete(&Prompt::for_persona("Planner", "split this"))
            .await
            .unwrap();
        assert_eq!(out, "You are the Planner agent.|split this|0.0");
    }

    #[tokio::test]
    async fn test_empty_choices_is_error() {
        let app = Router::new().route(
            "/chat/completions",
            post(|| async { Json(json!({"choices": []})) }),
        );
        let base = spawn_mock(app).await;
        let err = generator(&base)
            .complete(&Prompt::for_persona("Reasoning", "q"))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::EmptyResponse(_)));
    }

    #[test]
    fn test_missing_key_falls_back_to_offline() {
        let config = GenerationConfig {
            api_key_env: "CQA_TEST_GENERATION_KEY_NEVER_SET".to_string(),
            ..GenerationConfig::default()
        };
        let g = create_generator(&config).unwrap();
        assert_eq!(g.name(), "offline");
    }
}
