//! Source materializer: obtains or refreshes a local working copy.
//!
//! The [`Materializer`] trait is what the ingestion pipeline calls. The
//! production implementation, [`GitMaterializer`], shells out to the `git`
//! CLI:
//!
//! 1. No local copy → `git clone` (shallow if configured).
//! 2. Local copy exists → `git fetch` + `git reset --hard origin/<branch>`.
//! 3. Update fails → delete the local copy and clone again.
//!
//! The working copy is pure cache: it can be deleted at any time and the
//! next sync rebuilds it.

use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;

use codebase_qa_core::models::RepositoryRecord;

use crate::error::MaterializeError;

/// A synced working copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalCopy {
    pub path: PathBuf,
    /// Checked-out branch, when it could be determined.
    pub branch: Option<String>,
}

#[async_trait]
pub trait Materializer: Send + Sync {
    /// Make `dest` an up-to-date working copy of `url`. Idempotent.
    async fn sync(&self, url: &str, dest: &Path) -> Result<LocalCopy, MaterializeError>;
}

/// Cache directory for a repository: `<root>/<name>-<id suffix>`.
///
/// The id suffix keeps two repositories with the same name (different
/// owners) from sharing a directory.
pub fn cache_dir_for(root: &Path, record: &RepositoryRecord) -> PathBuf {
    let suffix = record.id.trim_start_matches("repo_");
    let name: String = record
        .name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    root.join(format!("{}-{}", name, suffix))
}

/// [`Materializer`] backed by the `git` command-line tool.
#[derive(Debug, Clone, Default)]
pub struct GitMaterializer {
    shallow: bool,
}

impl GitMaterializer {
    pub fn new(shallow: bool) -> Self {
        Self { shallow }
    }

    async fn clone_fresh(&self, url: &str, dest: &Path) -> Result<(), MaterializeError> {
        if dest.exists() {
            remove_dir(dest).await?;
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| MaterializeError::Io {
                    path: parent.display().to_string(),
                    source,
                })?;
        }

        let mut cmd = git();
        cmd.arg("clone");
        if self.shallow {
            cmd.args(["--depth", "1"]);
        }
        cmd.arg(url).arg(dest);

        let output = run(cmd).await?;
        if !output.status.success() {
            return Err(MaterializeError::Clone {
                url: url.to_string(),
                stderr: stderr_of(&output),
            });
        }
        Ok(())
    }

    async fn update(&self, dest: &Path) -> Result<(), MaterializeError> {
        let branch = current_branch(dest).await?;

        let mut fetch = git();
        fetch.current_dir(dest).args(["fetch", "origin", &branch]);
        if self.shallow {
            fetch.args(["--depth", "1"]);
        }
        check(run(fetch).await?, "fetch", dest)?;

        let remote_ref = format!("origin/{}", branch);
        let mut reset = git();
        reset
            .current_dir(dest)
            .args(["reset", "--hard", &remote_ref]);
        check(run(reset).await?, "reset", dest)?;

        Ok(())
    }
}

#[async_trait]
impl Materializer for GitMaterializer {
    async fn sync(&self, url: &str, dest: &Path) -> Result<LocalCopy, MaterializeError> {
        if dest.join(".git").exists() {
            match self.update(dest).await {
                Ok(()) => {
                    tracing::debug!(path = %dest.display(), "updated existing working copy");
                }
                Err(e) => {
                    tracing::warn!(
                        path = %dest.display(),
                        error = %e,
                        "update failed, re-cloning from scratch"
                    );
                    self.clone_fresh(url, dest).await?;
                }
            }
        } else {
            tracing::info!(url, path = %dest.display(), "cloning repository");
            self.clone_fresh(url, dest).await?;
        }

        let branch = current_branch(dest).await.ok();
        Ok(LocalCopy {
            path: dest.to_path_buf(),
            branch,
        })
    }
}

fn git() -> Command {
    let mut cmd = Command::new("git");
    // Never block on a credential prompt inside a background job.
    cmd.env("GIT_TERMINAL_PROMPT", "0");
    cmd.kill_on_drop(true);
    cmd
}

async fn run(mut cmd: Command) -> Result<Output, MaterializeError> {
    cmd.output().await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            MaterializeError::GitNotFound
        } else {
            MaterializeError::Io {
                path: "git".to_string(),
                source: e,
            }
        }
    })
}

fn check(output: Output, step: &'static str, dir: &Path) -> Result<Output, MaterializeError> {
    if output.status.success() {
        Ok(output)
    } else {
        Err(MaterializeError::Command {
            step,
            path: dir.display().to_string(),
            stderr: stderr_of(&output),
        })
    }
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

async fn current_branch(dir: &Path) -> Result<String, MaterializeError> {
    let mut cmd = git();
    cmd.current_dir(dir)
        .args(["rev-parse", "--abbrev-ref", "HEAD"]);
    let output = check(run(cmd).await?, "rev-parse", dir)?;
    let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if branch.is_empty() || branch == "HEAD" {
        return Err(MaterializeError::Command {
            step: "rev-parse",
            path: dir.display().to_string(),
            stderr: "detached HEAD".to_string(),
        });
    }
    Ok(branch)
}

async fn remove_dir(path: &Path) -> Result<(), MaterializeError> {
    tokio::fs::remove_dir_all(path)
        .await
        .map_err(|source| MaterializeError::Io {
            path: path.display().to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;
    use tempfile::TempDir;

    fn git_available() -> bool {
        StdCommand::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn sh_git(dir: &Path, args: &[&str]) {
        let status = StdCommand::new("git")
            .args([
                "-c",
                "user.name=Test",
                "-c",
                "user.email=test@example.com",
                "-c",
                "commit.gpgsign=false",
                "-c",
                "init.defaultBranch=main",
            ])
            .args(args)
            .current_dir(dir)
            .status()
            .unwrap();
        assert!(status.success(), "git {:?} failed", args);
    }

    fn make_origin(tmp: &TempDir) -> PathBuf {
        let origin = tmp.path().join("origin");
        std::fs::create_dir_all(&origin).unwrap();
        sh_git(&origin, &["init"]);
        std::fs::write(origin.join("lib.rs"), "fn one() {}\n").unwrap();
        sh_git(&origin, &["add", "."]);
        sh_git(&origin, &["commit", "-m", "first"]);
        origin
    }

    #[test]
    fn test_cache_dir_includes_id_suffix() {
        let rec = RepositoryRecord::queued("https://github.com/acme/widgets");
        let dir = cache_dir_for(Path::new("/tmp/repos"), &rec);
        let file_name = dir.file_name().unwrap().to_string_lossy().to_string();
        assert!(file_name.starts_with("widgets-"));
        assert!(file_name.ends_with(rec.id.trim_start_matches("repo_")));

        let other = RepositoryRecord::queued("https://github.com/other/widgets");
        assert_ne!(cache_dir_for(Path::new("/tmp/repos"), &other), dir);
    }

    #[tokio::test]
    async fn test_clone_update_and_self_heal() {
        if !git_available() {
            eprintln!("git not available, skipping");
            return;
        }
        let tmp = TempDir::new().unwrap();
        let origin = make_origin(&tmp);
        let url = origin.to_string_lossy().to_string();
        let dest = tmp.path().join("cache").join("origin-abc");

        let m = GitMaterializer::new(false);
        let copy = m.sync(&url, &dest).await.unwrap();
        assert_eq!(copy.branch.as_deref(), Some("main"));
        assert!(dest.join("lib.rs").exists());

        // New upstream commit is picked up by the update path.
        std::fs::write(origin.join("extra.rs"), "fn two() {}\n").unwrap();
        sh_git(&origin, &["add", "."]);
        sh_git(&origin, &["commit", "-m", "second"]);
        m.sync(&url, &dest).await.unwrap();
        assert!(dest.join("extra.rs").exists());

        // A corrupted working copy is discarded and cloned again.
        std::fs::write(dest.join(".git").join("HEAD"), "garbage").unwrap();
        let copy = m.sync(&url, &dest).await.unwrap();
        assert_eq!(copy.branch.as_deref(), Some("main"));
        assert!(dest.join("extra.rs").exists());
    }

    #[tokio::test]
    async fn test_clone_of_missing_remote_fails() {
        if !git_available() {
            return;
        }
        let tmp = TempDir::new().unwrap();
        let m = GitMaterializer::new(false);
        let missing = tmp.path().join("nope").to_string_lossy().to_string();
        let err = m
            .sync(&missing, &tmp.path().join("dest"))
            .await
            .unwrap_err();
        assert!(matches!(err, MaterializeError::Clone { .. }));
    }
}
