//! Augment stage support: issue / pull request lookups.
//!
//! [`detect`] is the trigger predicate: it recognises questions that refer
//! to issues or pull requests (`issue #12`, `PR 7`, `open pull requests`).
//! Only when it fires does the orchestrator ask an [`AuxiliarySource`] for
//! extra context. The heuristic is intentionally narrow.

use std::sync::OnceLock;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use crate::config::{api_key_from_env, GithubConfig};
use crate::http::{build_client, send_json, RetryPolicy};

const BODY_EXCERPT_CHARS: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Issue,
    PullRequest,
}

/// What the question asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AugmentRequest {
    pub kind: ReferenceKind,
    /// Specific number, if the question named one.
    pub number: Option<u64>,
}

fn trigger() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(issues?|prs?|pull\s+requests?)\b(?:\s*#?\s*(\d+))?")
            .expect("trigger pattern is valid")
    })
}

/// Trigger predicate for the Augment stage.
pub fn detect(question: &str) -> Option<AugmentRequest> {
    let caps = trigger().captures(question)?;
    let word = caps.get(1)?.as_str().to_ascii_lowercase();
    let kind = if word.starts_with("issue") {
        ReferenceKind::Issue
    } else {
        ReferenceKind::PullRequest
    };
    let number = caps.get(2).and_then(|m| m.as_str().parse().ok());
    Some(AugmentRequest { kind, number })
}

/// Source of issue / pull request metadata.
#[async_trait]
pub trait AuxiliarySource: Send + Sync {
    /// Fetch context lines for `request` about the repository at `repo_url`.
    /// An empty result means nothing relevant was found.
    async fn fetch(&self, repo_url: &str, request: &AugmentRequest) -> Result<Vec<String>>;
}

/// Source that never finds anything.
pub struct NoAuxiliarySource;

#[async_trait]
impl AuxiliarySource for NoAuxiliarySource {
    async fn fetch(&self, _repo_url: &str, _request: &AugmentRequest) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// GitHub REST API source.
pub struct GitHubSource {
    client: reqwest::Client,
    api_base: String,
    token: Option<String>,
    recent_limit: usize,
}

#[derive(Deserialize)]
struct GhItem {
    number: u64,
    title: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    html_url: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

impl GhItem {
    fn render(&self, as_pr: bool) -> String {
        let label = if as_pr || self.pull_request.is_some() {
            "Pull request"
        } else {
            "Issue"
        };
        let mut line = format!(
            "{} #{} [{}] {} ({})",
            label, self.number, self.state, self.title, self.html_url
        );
        if let Some(body) = self.body.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
            let excerpt: String = body.chars().take(BODY_EXCERPT_CHARS).collect();
            line.push('\n');
            line.push_str(&excerpt);
            if body.chars().count() > BODY_EXCERPT_CHARS {
                line.push_str("...");
            }
        }
        line
    }
}

impl GitHubSource {
    pub fn new(config: &GithubConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: api_key_from_env(&config.token_env),
            recent_limit: config.recent_limit.max(1),
        })
    }

    async fn get(&self, url: &str) -> Result<serde_json::Value> {
        let value = send_json(&RetryPolicy::new(1), || {
            let req = self
                .client
                .get(url)
                .header("Accept", "application/vnd.github+json");
            match &self.token {
                Some(token) => req.bearer_auth(token),
                None => req,
            }
        })
        .await
        .map_err(|e| anyhow::anyhow!("GitHub request failed: {}", e))?;
        Ok(value)
    }
}

#[async_trait]
impl AuxiliarySource for GitHubSource {
    async fn fetch(&self, repo_url: &str, request: &AugmentRequest) -> Result<Vec<String>> {
        let Some((owner, repo)) = parse_github_repo(repo_url) else {
            tracing::debug!(repo_url, "not a GitHub repository, skipping lookup");
            return Ok(Vec::new());
        };
        let as_pr = request.kind == ReferenceKind::PullRequest;

        match request.number {
            Some(n) => {
                let url = format!("{}/repos/{}/{}/issues/{}", self.api_base, owner, repo, n);
                let item: GhItem = serde_json::from_value(self.get(&url).await?)?;
                Ok(vec![item.render(as_pr)])
            }
            None => {
                let resource = if as_pr { "pulls" } else { "issues" };
                let url = format!(
                    "{}/repos/{}/{}/{}?state=open&per_page={}",
                    self.api_base, owner, repo, resource, self.recent_limit
                );
                let items: Vec<GhItem> = serde_json::from_value(self.get(&url).await?)?;
                Ok(items.iter().map(|i| i.render(as_pr)).collect())
            }
        }
    }
}

/// `(owner, repo)` for `https://github.com/owner/repo` or
/// `git@github.com:owner/repo` URLs.
pub fn parse_github_repo(url: &str) -> Option<(String, String)> {
    let url = url.trim().trim_end_matches('/');
    let url = url.strip_suffix(".git").unwrap_or(url);
    let rest = url
        .strip_prefix("git@github.com:")
        .or_else(|| {
            let lower = url.to_ascii_lowercase();
            ["https://github.com/", "http://github.com/", "https://www.github.com/"]
                .iter()
                .find(|p| lower.starts_with(*p))
                .map(|p| &url[p.len()..])
        })?;
    let mut parts = rest.split('/').filter(|s| !s.is_empty());
    let owner = parts.next()?.to_string();
    let repo = parts.next()?.to_string();
    Some((owner, repo))
}
