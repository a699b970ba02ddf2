//! Text-generation capability trait.
//!
//! Query stages talk to a language model only through [`Generator`]: one
//! system persona plus one user prompt in, one completion out. Concrete
//! HTTP providers live in the `codebase-qa` app crate; this module ships
//! the [`OfflineGenerator`] used when no provider credentials are set.

use async_trait::async_trait;

/// Failure of a single generation call.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("generation transport error: {0}")]
    Transport(String),

    #[error("generation API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("empty completion from {0}")]
    EmptyResponse(String),

    #[error("generation call timed out after {0}s")]
    Timeout(u64),
}

/// A prompt for one generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// Persona/system instruction.
    pub system: String,
    /// The task text.
    pub user: String,
}

impl Prompt {
    /// Prompt addressed to a named stage persona (`"You are the Planner agent."`).
    pub fn for_persona(persona: &str, user: impl Into<String>) -> Self {
        Self {
            system: format!("You are the {} agent.", persona),
            user: user.into(),
        }
    }
}

/// Prompt → completion.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Provider/model label used in logs.
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &Prompt) -> Result<String, GenerationError>;
}

/// Canned response returned by [`OfflineGenerator`].
pub const OFFLINE_RESPONSE: &str = "Simulated LLM Response: No API Key Configured.";

/// Generator that never leaves the process and always answers with
/// [`OFFLINE_RESPONSE`]. Keeps the query pipeline runnable without
/// credentials.
#[derive(Debug, Clone, Default)]
pub struct OfflineGenerator;

#[async_trait]
impl Generator for OfflineGenerator {
    fn name(&self) -> &str {
        "offline"
    }

    async fn complete(&self, _prompt: &Prompt) -> Result<String, GenerationError> {
        Ok(OFFLINE_RESPONSE.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persona_prompt() {
        let p = Prompt::for_persona("Planner", "break it down");
        assert_eq!(p.system, "You are the Planner agent.");
        assert_eq!(p.user, "break it down");
    }

    #[tokio::test]
    async fn test_offline_generator() {
        let g = OfflineGenerator;
        let out = g.complete(&Prompt::for_persona("Reasoning", "q")).await.unwrap();
        assert_eq!(out, OFFLINE_RESPONSE);
    }
}
