//! Sliding-window text chunker.
//!
//! Splits a [`Document`]'s text into overlapping fixed-size [`Chunk`]s.
//! Sizes are measured in Unicode scalar values ("text units"), so a window
//! never cuts a multi-byte character in half.
//!
//! # Algorithm
//!
//! 1. Index the character boundaries of the text.
//! 2. Emit `text[start..start + window]`, then advance `start` by
//!    `window - overlap`.
//! 3. Stop once a window reaches the end of the text; the last window may
//!    be shorter than `window`.
//! 4. Windows containing only whitespace are dropped, so a whitespace-only
//!    document produces no chunks at all.
//!
//! The same text always yields the same boundaries, sequence indices and
//! chunk ids, which is what makes re-ingestion an idempotent overwrite.
//!
//! # Example
//!
//! ```rust
//! use codebase_qa_core::chunk::{split_document, ChunkingParams};
//! use codebase_qa_core::models::Document;
//!
//! let doc = Document {
//!     path: "src/lib.rs".to_string(),
//!     raw_text: "fn main() {}".to_string(),
//!     repo_id: "repo_abc".to_string(),
//! };
//! let chunks = split_document(&doc, &ChunkingParams::default());
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].id, "src/lib.rs#0");
//! ```

use sha2::{Digest, Sha256};

use crate::models::{Chunk, Document};

/// Default window size in text units.
pub const DEFAULT_WINDOW: usize = 1000;
/// Default overlap between consecutive windows in text units.
pub const DEFAULT_OVERLAP: usize = 200;

/// Longest chunk id kept in readable form. Longer (or non-ASCII) paths are
/// hashed so ids stay within vector-store id limits.
const MAX_READABLE_ID_LEN: usize = 512;

/// Window geometry for [`split_document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingParams {
    pub window: usize,
    pub overlap: usize,
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

impl ChunkingParams {
    /// Distance between the starts of consecutive windows (at least 1).
    pub fn step(&self) -> usize {
        self.window.saturating_sub(self.overlap).max(1)
    }
}

/// Split a document into overlapping windows.
///
/// # Guarantees
///
/// - Sequence indices are contiguous: `0, 1, …, N-1`.
/// - Every chunk has at most `params.window` characters.
/// - Chunk ids are derived from the full relative path and the sequence
///   index, so two files sharing a basename never collide.
pub fn split_document(doc: &Document, params: &ChunkingParams) -> Vec<Chunk> {
    let text = doc.raw_text.as_str();
    let mut boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    boundaries.push(text.len());
    let total_chars = boundaries.len() - 1;

    let window = params.window.max(1);
    let step = params.step();

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < total_chars {
        let end = (start + window).min(total_chars);
        let piece = &text[boundaries[start]..boundaries[end]];

        if !piece.trim().is_empty() {
            let sequence_index = chunks.len();
            chunks.push(Chunk {
                id: chunk_id(&doc.path, sequence_index),
                text: piece.to_string(),
                source_path: doc.path.clone(),
                repo_id: doc.repo_id.clone(),
                sequence_index,
            });
        }

        if end == total_chars {
            break;
        }
        start += step;
    }

    chunks
}

/// Canonical chunk id within a repository namespace:
/// `<relative path>#<sequence index>`.
pub fn chunk_id(source_path: &str, sequence_index: usize) -> String {
    let readable = format!("{}#{}", source_path, sequence_index);
    if readable.is_ascii() && readable.len() <= MAX_READABLE_ID_LEN {
        return readable;
    }

    let mut hasher = Sha256::new();
    hasher.update(source_path.as_bytes());
    format!("sha256:{:x}#{}", hasher.finalize(), sequence_index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(path: &str, text: &str) -> Document {
        Document {
            path: path.to_string(),
            raw_text: text.to_string(),
            repo_id: "repo_test".to_string(),
        }
    }

    fn params(window: usize, overlap: usize) -> ChunkingParams {
        ChunkingParams { window, overlap }
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = split_document(&doc("a.py", "print('hi')\n"), &ChunkingParams::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].sequence_index, 0);
        assert_eq!(chunks[0].text, "print('hi')\n");
        assert_eq!(chunks[0].source_path, "a.py");
        assert_eq!(chunks[0].repo_id, "repo_test");
    }

    #[test]
    fn test_empty_and_whitespace_text() {
        assert!(split_document(&doc("a.md", ""), &ChunkingParams::default()).is_empty());
        assert!(split_document(&doc("a.md", " \n\t\n "), &ChunkingParams::default()).is_empty());
    }

    #[test]
    fn test_window_and_overlap_boundaries() {
        // 25 chars, window 10, overlap 4 => starts at 0, 6, 12, 18
        let text: String = ('a'..='y').collect();
        let chunks = split_document(&doc("x.txt", &text), &params(10, 4));
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["abcdefghij", "ghijklmnop", "mnopqrstuv", "stuvwxy"]);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.sequence_index, i);
        }
    }

    #[test]
    fn test_exact_window_is_one_chunk() {
        let text = "x".repeat(1000);
        let chunks = split_document(&doc("x.txt", &text), &ChunkingParams::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text.chars().count(), 1000);
    }

    #[test]
    fn test_default_geometry_on_long_text() {
        let text = "y".repeat(2500);
        let chunks = split_document(&doc("x.txt", &text), &ChunkingParams::default());
        // starts at 0, 800, 1600 -> last window ends at 2500
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].text.chars().count(), 900);
    }

    #[test]
    fn test_multibyte_characters_are_not_split() {
        let text = "héllo wörld ☃☃☃ ünïcödé".repeat(10);
        let chunks = split_document(&doc("u.md", &text), &params(7, 2));
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.chars().count() <= 7);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "lorem ipsum dolor sit amet ".repeat(100);
        let a = split_document(&doc("lib/x.rs", &text), &params(100, 20));
        let b = split_document(&doc("lib/x.rs", &text), &params(100, 20));
        assert_eq!(a, b);
    }

    #[test]
    fn test_same_basename_different_dirs_do_not_collide() {
        let a = split_document(&doc("src/util.py", "a = 1"), &ChunkingParams::default());
        let b = split_document(&doc("tests/util.py", "a = 1"), &ChunkingParams::default());
        assert_ne!(a[0].id, b[0].id);
    }

    #[test]
    fn test_long_or_non_ascii_paths_are_hashed() {
        let long_path = format!("{}/main.rs", "d".repeat(600));
        let id = chunk_id(&long_path, 3);
        assert!(id.starts_with("sha256:"));
        assert!(id.ends_with("#3"));
        assert!(chunk_id("docs/café.md", 0).starts_with("sha256:"));
        assert_eq!(chunk_id("docs/cafe.md", 0), "docs/cafe.md#0");
    }
}
