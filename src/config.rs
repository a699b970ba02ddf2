//! TOML configuration parsing and validation.
//!
//! Every section has defaults, so an empty file (or no file at all, via
//! [`Config::default`]) yields a working offline setup: hashing embeddings,
//! an in-memory index, and the offline generator unless an API key is
//! present in the environment.
//!
//! Secrets are never read from the file. Each provider section names the
//! environment variable holding its key (`api_key_env`).

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use codebase_qa_core::chunk::ChunkingParams;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub ingest: IngestConfig,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub generation: GenerationConfig,
    pub retrieval: RetrievalConfig,
    pub github: GithubConfig,
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// CORS origins. Empty means any origin.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the working-copy cache; one subdirectory per repository.
    pub cache_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./repos"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IngestConfig {
    /// Maximum number of repositories that are `Indexed` or on their way there.
    pub quota: usize,
    /// File extensions (without the dot) selected by discovery.
    pub include_extensions: Vec<String>,
    /// Extra glob patterns excluded from discovery, relative to the repo root.
    pub exclude_globs: Vec<String>,
    /// Files larger than this are skipped with a warning.
    pub max_file_bytes: u64,
    /// Clone with `--depth 1`.
    pub shallow_clone: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            quota: 5,
            include_extensions: default_extensions(),
            exclude_globs: Vec::new(),
            max_file_bytes: 2 * 1024 * 1024,
            shallow_clone: true,
        }
    }
}

fn default_extensions() -> Vec<String> {
    [
        "py", "js", "ts", "jsx", "tsx", "md", "txt", "java", "go", "rs", "c", "cpp", "h",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Window size in text units (characters).
    pub window: usize,
    /// Overlap between consecutive windows in text units.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        let params = ChunkingParams::default();
        Self {
            window: params.window,
            overlap: params.overlap,
        }
    }
}

impl ChunkingConfig {
    pub fn params(&self) -> ChunkingParams {
        ChunkingParams {
            window: self.window,
            overlap: self.overlap,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `"hashing"`, `"openai"`, or `"disabled"`.
    pub provider: String,
    pub model: Option<String>,
    pub dims: usize,
    /// Texts per embedding call.
    pub batch_size: usize,
    pub base_url: String,
    pub api_key_env: String,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "hashing".to_string(),
            model: None,
            dims: 384,
            batch_size: 64,
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IndexConfig {
    /// `"memory"` or `"pinecone"`.
    pub provider: String,
    /// Data-plane host of the Pinecone index (e.g. `https://codebase-xxxx.svc.pinecone.io`).
    pub host: Option<String>,
    pub api_key_env: String,
    /// Records per upsert call.
    pub upsert_batch_size: usize,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            provider: "memory".to_string(),
            host: None,
            api_key_env: "PINECONE_API_KEY".to_string(),
            upsert_batch_size: 100,
            max_retries: 3,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GenerationConfig {
    /// `"openai"` (any OpenAI-compatible chat API) or `"offline"`.
    pub provider: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub api_key_env: String,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
            temperature: 0.0,
            max_tokens: 1024,
            api_key_env: "GROQ_API_KEY".to_string(),
            max_retries: 2,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Retrieved chunk text is truncated to this many characters in prompts.
    pub snippet_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            snippet_chars: 500,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GithubConfig {
    /// Set to false to turn the Augment stage's GitHub lookups off.
    pub enabled: bool,
    pub api_base: String,
    pub token_env: String,
    /// Issues fetched when the question mentions issues without a number.
    pub recent_limit: usize,
    pub timeout_secs: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_base: "https://api.github.com".to_string(),
            token_env: "GITHUB_TOKEN".to_string(),
            recent_limit: 5,
            timeout_secs: 15,
        }
    }
}

/// Outer bounds on whole capability calls, retries included.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TimeoutConfig {
    pub materialize_secs: u64,
    pub embed_secs: u64,
    pub index_secs: u64,
    pub generate_secs: u64,
    pub augment_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            materialize_secs: 600,
            embed_secs: 300,
            index_secs: 120,
            generate_secs: 180,
            augment_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// Read an API key from the environment variable `var`, treating empty
/// and placeholder values (`your_...`) as absent.
pub fn api_key_from_env(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty() && !k.starts_with("your_"))
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check cross-field constraints that serde cannot express.
pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.window == 0 {
        bail!("chunking.window must be > 0");
    }
    if config.chunking.overlap >= config.chunking.window {
        bail!("chunking.overlap must be smaller than chunking.window");
    }
    if config.ingest.quota == 0 {
        bail!("ingest.quota must be >= 1");
    }
    if config.ingest.include_extensions.is_empty() {
        bail!("ingest.include_extensions must not be empty");
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if config.index.upsert_batch_size == 0 {
        bail!("index.upsert_batch_size must be > 0");
    }
    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "hashing" | "disabled" => {}
        "openai" => {
            if config.embedding.model.is_none() {
                bail!("embedding.model must be specified when provider is 'openai'");
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be hashing, openai, or disabled.",
            other
        ),
    }
    if config.embedding.is_enabled() && config.embedding.dims == 0 {
        bail!("embedding.dims must be > 0");
    }

    match config.index.provider.as_str() {
        "memory" => {}
        "pinecone" => {
            if config.index.host.is_none() {
                bail!("index.host must be specified when provider is 'pinecone'");
            }
        }
        other => bail!(
            "Unknown index provider: '{}'. Must be memory or pinecone.",
            other
        ),
    }

    match config.generation.provider.as_str() {
        "openai" | "offline" => {}
        other => bail!(
            "Unknown generation provider: '{}'. Must be openai or offline.",
            other
        ),
    }

    Ok(())
}
