//! Query orchestrator.
//!
//! Answers one question about one repository by running a fixed, linear
//! list of stages over a per-query [`PipelineState`]:
//!
//! ```text
//! Plan → Retrieve → Augment → Reason → Review → Finalize
//! ```
//!
//! Stages are dispatched by `match` over [`Stage`]; the order is the
//! constant [`PIPELINE`]. No stage can fail the query: capability errors
//! degrade the state (empty plan, "no results" marker, fallback answer)
//! and the final confidence reflects what was lost.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use codebase_qa_core::embedding::{embed_query, Embedder};
use codebase_qa_core::generation::{GenerationError, Generator, Prompt};
use codebase_qa_core::store::VectorIndex;

use crate::augment::{detect, AuxiliarySource, NoAuxiliarySource};
use crate::config::{Config, TimeoutConfig};

/// One orchestrator stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Plan,
    Retrieve,
    Augment,
    Reason,
    Review,
    Finalize,
}

/// Execution order of the stages.
pub const PIPELINE: [Stage; 6] = [
    Stage::Plan,
    Stage::Retrieve,
    Stage::Augment,
    Stage::Reason,
    Stage::Review,
    Stage::Finalize,
];

/// An item of retrieved context.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContextEntry {
    Snippet {
        source_path: String,
        score: f32,
        text: String,
    },
    /// Retrieval found nothing (or failed); `reason` says which.
    NoResults { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Low,
    Unknown,
}

/// Outcome of a [`ReviewPolicy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewVerdict {
    Accept,
    /// Replace the answer with the given text.
    Amend(String),
    /// Keep the answer but flag it; confidence drops to `low`.
    Reject(String),
}

/// Decides what to do with the Review stage's assessment.
pub trait ReviewPolicy: Send + Sync {
    /// `review` is the generated assessment, or `None` if generation failed.
    fn review(&self, state: &PipelineState, review: Option<&str>) -> ReviewVerdict;
}

/// Default policy: the review is recorded but never changes the answer.
pub struct AdvisoryReview;

impl ReviewPolicy for AdvisoryReview {
    fn review(&self, _state: &PipelineState, _review: Option<&str>) -> ReviewVerdict {
        ReviewVerdict::Accept
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalOutput {
    pub answer: String,
    pub confidence: Confidence,
    /// Distinct source paths of the retrieved snippets, best match first.
    pub sources: Vec<String>,
}

/// Mutable record threaded through the stages of one query.
#[derive(Debug, Clone)]
pub struct PipelineState {
    pub input_text: String,
    pub repo_id: String,
    pub repo_url: String,
    pub plan: String,
    pub retrieved_context: Vec<ContextEntry>,
    pub augmentation: Vec<String>,
    pub answer: String,
    pub reasoning_failed: bool,
    pub review: Option<String>,
    pub verdict: ReviewVerdict,
    pub final_output: Option<FinalOutput>,
}

impl PipelineState {
    pub fn new(input_text: &str, repo_id: &str, repo_url: &str) -> Self {
        Self {
            input_text: input_text.to_string(),
            repo_id: repo_id.to_string(),
            repo_url: repo_url.to_string(),
            plan: String::new(),
            retrieved_context: Vec::new(),
            augmentation: Vec::new(),
            answer: String::new(),
            reasoning_failed: false,
            review: None,
            verdict: ReviewVerdict::Accept,
            final_output: None,
        }
    }

    fn has_snippets(&self) -> bool {
        self.retrieved_context
            .iter()
            .any(|c| matches!(c, ContextEntry::Snippet { .. }))
    }

    fn sources(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.retrieved_context
            .iter()
            .filter_map(|c| match c {
                ContextEntry::Snippet { source_path, .. } => Some(source_path.clone()),
                ContextEntry::NoResults { .. } => None,
            })
            .filter(|p| seen.insert(p.clone()))
            .collect()
    }
}

pub struct Orchestrator {
    generator: Arc<dyn Generator>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    auxiliary: Arc<dyn AuxiliarySource>,
    review_policy: Arc<dyn ReviewPolicy>,
    top_k: usize,
    snippet_chars: usize,
    timeouts: TimeoutConfig,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        generator: Arc<dyn Generator>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            generator,
            embedder,
            index,
            auxiliary: Arc::new(NoAuxiliarySource),
            review_policy: Arc::new(AdvisoryReview),
            top_k: config.retrieval.top_k,
            snippet_chars: config.retrieval.snippet_chars,
            timeouts: config.timeouts.clone(),
        }
    }

    pub fn with_auxiliary(mut self, auxiliary: Arc<dyn AuxiliarySource>) -> Self {
        self.auxiliary = auxiliary;
        self
    }

    pub fn with_review_policy(mut self, policy: Arc<dyn ReviewPolicy>) -> Self {
        self.review_policy = policy;
        self
    }

    /// Answer `question` from the namespace of `repo_id`.
    pub async fn answer(&self, question: &str, repo_id: &str, repo_url: &str) -> FinalOutput {
        let state = self
            .run(PipelineState::new(question, repo_id, repo_url))
            .await;
        state.final_output.unwrap_or_else(|| FinalOutput {
            answer: String::new(),
            confidence: Confidence::Unknown,
            sources: Vec::new(),
        })
    }

    /// Run every stage of [`PIPELINE`] in order and return the final state.
    pub async fn run(&self, mut state: PipelineState) -> PipelineState {
        for stage in PIPELINE {
            tracing::debug!(repo_id = %state.repo_id, ?stage, "running stage");
            match stage {
                Stage::Plan => self.plan(&mut state).await,
                Stage::Retrieve => self.retrieve(&mut state).await,
                Stage::Augment => self.augment(&mut state).await,
                Stage::Reason => self.reason(&mut state).await,
                Stage::Review => self.review(&mut state).await,
                Stage::Finalize => finalize(&mut state),
            }
        }
        state
    }

    async fn generate(&self, persona: &str, user: String) -> Result<String, GenerationError> {
        let secs = self.timeouts.generate_secs;
        let prompt = Prompt::for_persona(persona, user);
        tokio::time::timeout(Duration::from_secs(secs), self.generator.complete(&prompt))
            .await
            .map_err(|_| GenerationError::Timeout(secs))?
    }

    async fn plan(&self, state: &mut PipelineState) {
        let user = format!(
            "Analyze this request and break it down into steps: {}",
            state.input_text
        );
        match self.generate("Planner", user).await {
            Ok(plan) => state.plan = plan,
            Err(e) => {
                tracing::warn!(error = %e, "planning failed, continuing without a plan");
                state.plan.clear();
            }
        }
    }

    async fn retrieve(&self, state: &mut PipelineState) {
        match self.search(&state.input_text, &state.repo_id).await {
            Ok(entries) if entries.is_empty() => {
                state.retrieved_context.push(ContextEntry::NoResults {
                    reason: "No relevant code found in the repository.".to_string(),
                });
            }
            Ok(entries) => state.retrieved_context.extend(entries),
            Err(reason) => {
                tracing::warn!(repo_id = %state.repo_id, error = %reason, "retrieval failed");
                state.retrieved_context.push(ContextEntry::NoResults {
                    reason: format!("Retrieval failed: {}", reason),
                });
            }
        }
    }

    async fn search(&self, question: &str, repo_id: &str) -> Result<Vec<ContextEntry>, String> {
        let embed_secs = self.timeouts.embed_secs;
        let vector = tokio::time::timeout(
            Duration::from_secs(embed_secs),
            embed_query(self.embedder.as_ref(), question),
        )
        .await
        .map_err(|_| format!("embedding timed out after {}s", embed_secs))?
        .map_err(|e| e.to_string())?;

        let index_secs = self.timeouts.index_secs;
        let matches = tokio::time::timeout(
            Duration::from_secs(index_secs),
            self.index.query(repo_id, &vector, self.top_k),
        )
        .await
        .map_err(|_| format!("index query timed out after {}s", index_secs))?
        .map_err(|e| e.to_string())?;

        Ok(matches
            .into_iter()
            .filter(|m| {
                let own = m.metadata.repo_id == repo_id;
                if !own {
                    tracing::warn!(
                        repo_id,
                        foreign = %m.metadata.repo_id,
                        id = %m.id,
                        "dropping match from another repository"
                    );
                }
                own
            })
            .take(self.top_k)
            .map(|m| ContextEntry::Snippet {
                source_path: m.metadata.source_path,
                score: m.score,
                text: truncate_chars(&m.metadata.text, self.snippet_chars),
            })
            .collect())
    }

    async fn augment(&self, state: &mut PipelineState) {
        let Some(request) = detect(&state.input_text) else {
            return;
        };
        let secs = self.timeouts.augment_secs;
        let result = tokio::time::timeout(
            Duration::from_secs(secs),
            self.auxiliary.fetch(&state.repo_url, &request),
        )
        .await;
        match result {
            Ok(Ok(lines)) => state.augmentation.extend(lines),
            Ok(Err(e)) => tracing::warn!(error = %format!("{:#}", e), "augmentation failed"),
            Err(_) => tracing::warn!(secs, "augmentation timed out"),
        }
    }

    async fn reason(&self, state: &mut PipelineState) {
        let user = format!(
            "Question: {}\nContext: {}\n\nAnswer based on the context provided.",
            state.input_text,
            render_context(state)
        );
        match self.generate("Reasoning", user).await {
            Ok(answer) => state.answer = answer,
            Err(e) => {
                tracing::warn!(error = %e, "reasoning failed, using fallback answer");
                state.reasoning_failed = true;
                state.answer = fallback_answer(state);
            }
        }
    }

    async fn review(&self, state: &mut PipelineState) {
        let user = format!(
            "Review this answer: {}\nIs it safe and grounded in code? If not, flag it.",
            state.answer
        );
        state.review = match self.generate("Safety", user).await {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::warn!(error = %e, "review failed");
                None
            }
        };
        state.verdict = self
            .review_policy
            .review(state, state.review.as_deref());
    }
}

fn finalize(state: &mut PipelineState) {
    let mut answer = state.answer.clone();
    let confidence = match &state.verdict {
        ReviewVerdict::Reject(reason) => {
            answer.push_str(&format!("\n\nReview note: {}", reason));
            Confidence::Low
        }
        _ if state.reasoning_failed => Confidence::Unknown,
        _ if state.has_snippets() => Confidence::High,
        _ => Confidence::Low,
    };
    if let ReviewVerdict::Amend(amended) = &state.verdict {
        answer = amended.clone();
    }

    state.final_output = Some(FinalOutput {
        answer,
        confidence,
        sources: state.sources(),
    });
}

fn render_context(state: &PipelineState) -> String {
    let mut parts = Vec::new();
    if !state.plan.is_empty() {
        parts.push(format!("Plan:\n{}", state.plan));
    }
    for entry in &state.retrieved_context {
        match entry {
            ContextEntry::Snippet {
                source_path,
                score,
                text,
            } => parts.push(format!("File: {} (score {:.2})\n{}", source_path, score, text)),
            ContextEntry::NoResults { reason } => parts.push(reason.clone()),
        }
    }
    if !state.augmentation.is_empty() {
        parts.push(format!("Related activity:\n{}", state.augmentation.join("\n")));
    }
    parts.join("\n\n")
}

fn fallback_answer(state: &PipelineState) -> String {
    let sources = state.sources();
    if sources.is_empty() {
        "I could not generate an answer and found no relevant code for this question.".to_string()
    } else {
        format!(
            "I could not generate an answer. The most relevant files are: {}",
            sources.join(", ")
        )
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
