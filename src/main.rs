//! # Codebase Q&A CLI (`cqa`)
//!
//! ## Usage
//!
//! ```bash
//! cqa --config ./config/cqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cqa serve` | Start the HTTP API |
//! | `cqa ingest <url>` | Ingest one repository and wait for it to finish |
//! | `cqa ask <url> "<question>"` | Ingest a repository, then answer a question about it |
//! | `cqa clear` | Delete every namespace in the configured index |
//!
//! Set `RUST_LOG` (e.g. `RUST_LOG=codebase_qa=debug`) for more detailed logs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use codebase_qa::config::{self, Config};
use codebase_qa::models::RepoStatus;
use codebase_qa::server;
use codebase_qa::service::RepoService;

/// Codebase Q&A: index source repositories and ask questions about them.
#[derive(Parser)]
#[command(name = "cqa", version, about)]
struct Cli {
    /// Path to configuration file (TOML). Defaults apply when it is missing.
    #[arg(long, global = true, default_value = "./config/cqa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server.
    Serve,

    /// Ingest a repository and wait until it is indexed.
    Ingest {
        /// Repository URL (or local path) to clone.
        url: String,
    },

    /// Ingest a repository, then answer a question about it.
    Ask {
        url: String,
        question: String,
    },

    /// Delete every namespace in the configured index.
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load_or_default(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(cfg).await?;
        }
        Commands::Ingest { url } => {
            let service = RepoService::from_config(cfg)?;
            let id = ingest_and_wait(&service, &url).await?;
            let record = service.get(&id)?;
            println!("{}: {}", record.id, record.status_message);
        }
        Commands::Ask { url, question } => {
            let service = RepoService::from_config(cfg)?;
            let id = ingest_and_wait(&service, &url).await?;
            let output = service.query(&id, &question).await?;

            println!("{}", output.answer);
            println!();
            println!("confidence: {:?}", output.confidence);
            if !output.sources.is_empty() {
                println!("sources:");
                for source in &output.sources {
                    println!("  {}", source);
                }
            }
        }
        Commands::Clear => {
            let service = RepoService::from_config(cfg)?;
            let namespaces = service.clear_all().await?;
            println!("Deleted {} namespaces.", namespaces.len());
        }
    }

    Ok(())
}

fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        return config::load_config(path);
    }
    tracing::info!(path = %path.display(), "config file not found, using defaults");
    let cfg = Config::default();
    config::validate(&cfg)?;
    Ok(cfg)
}

/// Start ingesting `url`, print progress changes, and return the repo id
/// once the job is `Indexed`.
async fn ingest_and_wait(service: &RepoService, url: &str) -> Result<String> {
    let accepted = service.create_ingestion(url)?;
    let id = accepted.repo_id;
    println!("{}: {}", id, accepted.message);

    let mut last = (0u8, String::new());
    loop {
        let record = service.get(&id)?;
        let current = (record.progress, record.status_message.clone());
        if current != last {
            println!("[{:>3}%] {}", record.progress, record.status_message);
            last = current;
        }
        match record.status {
            RepoStatus::Indexed => return Ok(id),
            RepoStatus::Error => bail!("ingestion failed: {}", record.status_message),
            RepoStatus::Queued | RepoStatus::Indexing => {
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        }
    }
}
