//! File discovery and filtering over a working copy.
//!
//! [`DocumentWalker`] is a lazy iterator of [`Document`]s: files are read
//! one at a time as the iterator is advanced, so a large repository is
//! never held in memory at once. The walk skips version-control metadata
//! directories, applies the configured exclude globs, and keeps only files
//! whose extension is in the allowlist.
//!
//! Unreadable, oversized, and non-UTF-8 files are skipped with a warning
//! and counted in [`DiscoveryStats`]; they never fail the walk.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::{DirEntry, WalkDir};

use codebase_qa_core::models::Document;

use crate::config::IngestConfig;

const VCS_DIRS: &[&str] = &[".git", ".hg", ".svn"];

/// Counters accumulated while walking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryStats {
    /// Documents yielded.
    pub selected: usize,
    /// Matching files skipped because they could not be read as text.
    pub skipped: usize,
}

/// Lazy, finite, single-pass sequence of documents under a root.
pub struct DocumentWalker {
    root: PathBuf,
    repo_id: String,
    entries: Box<dyn Iterator<Item = walkdir::Result<DirEntry>> + Send>,
    extensions: HashSet<String>,
    excludes: GlobSet,
    max_file_bytes: u64,
    stats: DiscoveryStats,
}

impl DocumentWalker {
    pub fn new(root: &Path, repo_id: &str, config: &IngestConfig) -> Result<Self> {
        if !root.is_dir() {
            bail!("Working copy does not exist: {}", root.display());
        }

        let entries = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_vcs_dir(e));

        Ok(Self {
            root: root.to_path_buf(),
            repo_id: repo_id.to_string(),
            entries: Box::new(entries),
            extensions: config
                .include_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            excludes: build_globset(&config.exclude_globs)?,
            max_file_bytes: config.max_file_bytes,
            stats: DiscoveryStats::default(),
        })
    }

    pub fn stats(&self) -> DiscoveryStats {
        self.stats
    }

    fn wants(&self, rel_path: &str, path: &Path) -> bool {
        if self.excludes.is_match(rel_path) {
            return false;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.contains(&e.to_ascii_lowercase()))
            .unwrap_or(false)
    }

    fn skip(&mut self, rel_path: &str, reason: &str) {
        self.stats.skipped += 1;
        tracing::warn!(path = rel_path, reason, "skipping file during discovery");
    }
}

impl Iterator for DocumentWalker {
    type Item = Document;

    fn next(&mut self) -> Option<Document> {
        loop {
            let entry = match self.entries.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    self.stats.skipped += 1;
                    tracing::warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let rel_path = relative_path(&self.root, path);
            if !self.wants(&rel_path, path) {
                continue;
            }

            match entry.metadata() {
                Ok(meta) if meta.len() > self.max_file_bytes => {
                    self.skip(&rel_path, "file too large");
                    continue;
                }
                Ok(_) => {}
                Err(_) => {
                    self.skip(&rel_path, "metadata unavailable");
                    continue;
                }
            }

            let bytes = match std::fs::read(path) {
                Ok(b) => b,
                Err(_) => {
                    self.skip(&rel_path, "unreadable");
                    continue;
                }
            };
            let raw_text = match String::from_utf8(bytes) {
                Ok(t) => t,
                Err(_) => {
                    self.skip(&rel_path, "not valid UTF-8");
                    continue;
                }
            };

            self.stats.selected += 1;
            return Some(Document {
                path: rel_path,
                raw_text,
                repo_id: self.repo_id.clone(),
            });
        }
    }
}

fn is_vcs_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| VCS_DIRS.contains(&name))
            .unwrap_or(false)
}

/// `/`-separated path of `path` relative to `root`.
fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn paths(walker: DocumentWalker) -> Vec<String> {
        walker.map(|d| d.path).collect()
    }

    #[test]
    fn test_selects_by_extension_and_skips_vcs() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "src/main.rs", b"fn main() {}");
        write(tmp.path(), "README.md", b"# hi");
        write(tmp.path(), "logo.png", b"\x89PNG");
        write(tmp.path(), "Cargo.lock", b"lock");
        write(tmp.path(), ".git/config.txt", b"not source");

        let walker = DocumentWalker::new(tmp.path(), "repo_x", &IngestConfig::default()).unwrap();
        assert_eq!(paths(walker), vec!["README.md", "src/main.rs"]);
    }

    #[test]
    fn test_documents_carry_repo_id_and_text() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.py", b"print('a')");
        let docs: Vec<Document> =
            DocumentWalker::new(tmp.path(), "repo_y", &IngestConfig::default())
                .unwrap()
                .collect();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].repo_id, "repo_y");
        assert_eq!(docs[0].raw_text, "print('a')");
    }

    #[test]
    fn test_non_utf8_is_skipped_and_counted() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "good.txt", b"hello");
        write(tmp.path(), "bad.txt", &[0xff, 0xfe, 0x00, 0x80]);

        let mut walker =
            DocumentWalker::new(tmp.path(), "r", &IngestConfig::default()).unwrap();
        let docs: Vec<Document> = walker.by_ref().collect();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].path, "good.txt");
        assert_eq!(
            walker.stats(),
            DiscoveryStats {
                selected: 1,
                skipped: 1
            }
        );
    }

    #[test]
    fn test_exclude_globs_and_size_limit() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "vendor/dep.js", b"x");
        write(tmp.path(), "app.js", b"y");
        write(tmp.path(), "big.txt", &vec![b'a'; 64]);

        let config = IngestConfig {
            exclude_globs: vec!["vendor/**".to_string()],
            max_file_bytes: 32,
            ..IngestConfig::default()
        };
        let walker = DocumentWalker::new(tmp.path(), "r", &config).unwrap();
        assert_eq!(paths(walker), vec!["app.js"]);
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let tmp = TempDir::new().unwrap();
        assert!(
            DocumentWalker::new(&tmp.path().join("nope"), "r", &IngestConfig::default()).is_err()
        );
    }

    #[test]
    fn test_empty_tree_yields_nothing() {
        let tmp = TempDir::new().unwrap();
        let walker = DocumentWalker::new(tmp.path(), "r", &IngestConfig::default()).unwrap();
        assert!(paths(walker).is_empty());
    }
}
