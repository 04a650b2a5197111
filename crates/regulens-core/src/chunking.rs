//! Overlapping sliding-window text splitting for embedding and retrieval.
//!
//! The splitter walks normalized text producing chunks of a target
//! character length. When a boundary would split a word it backs off to
//! the nearest preceding whitespace, as long as that keeps the chunk at
//! least a minimum fraction of the target length. Consecutive chunks
//! overlap so retrieval context survives chunk boundaries, and a hard
//! chunk-count ceiling guards against pathological inputs.

use crate::defaults;
use crate::text::{detect_language_tag, estimate_tokens, normalize_whitespace};

/// Configuration for the text splitter.
#[derive(Debug, Clone)]
pub struct SplitterConfig {
    /// Target characters per chunk.
    pub target_chars: usize,
    /// Characters shared between consecutive chunks.
    pub overlap_chars: usize,
    /// A back-off boundary may not shrink a chunk below this fraction of
    /// the target.
    pub min_fraction: f64,
    /// Hard ceiling on produced chunks.
    pub max_chunks: usize,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            target_chars: defaults::CHUNK_TARGET_CHARS,
            overlap_chars: defaults::CHUNK_OVERLAP_CHARS,
            min_fraction: defaults::CHUNK_MIN_FRACTION,
            max_chunks: defaults::CHUNK_MAX_COUNT,
        }
    }
}

impl SplitterConfig {
    /// Set the target chunk length.
    pub fn with_target(mut self, chars: usize) -> Self {
        self.target_chars = chars;
        self
    }

    /// Set the overlap length.
    pub fn with_overlap(mut self, chars: usize) -> Self {
        self.overlap_chars = chars;
        self
    }

    /// Set the chunk-count ceiling.
    pub fn with_max_chunks(mut self, max: usize) -> Self {
        self.max_chunks = max;
        self
    }
}

/// One split chunk with its position in the normalized text.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub index: i32,
    pub content: String,
    /// Byte offset into the *normalized* text.
    pub start_offset: usize,
    pub end_offset: usize,
    pub language_tag: String,
    pub token_estimate: i32,
}

/// Find a UTF-8 boundary at or before the given byte position.
fn find_char_boundary_before(text: &str, mut pos: usize) -> usize {
    while pos > 0 && !text.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

/// Find a UTF-8 boundary at or after the given byte position.
fn find_char_boundary_after(text: &str, mut pos: usize) -> usize {
    while pos < text.len() && !text.is_char_boundary(pos) {
        pos += 1;
    }
    pos
}

/// Split raw text into overlapping chunks.
///
/// The input is whitespace-normalized first, so offsets refer to the
/// normalized form (the same form that gets hashed and persisted).
pub fn split_text(raw: &str, config: &SplitterConfig) -> Vec<TextChunk> {
    let text = normalize_whitespace(raw);
    if text.is_empty() || config.target_chars == 0 {
        return vec![];
    }

    // Step size must move forward even with a degenerate overlap.
    let min_len = ((config.target_chars as f64) * config.min_fraction).ceil() as usize;
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < text.len() && chunks.len() < config.max_chunks {
        let mut end = find_char_boundary_before(&text, (start + config.target_chars).min(text.len()));

        // Back off to a word boundary unless that makes the chunk too small.
        // Normalization guarantees the only whitespace is an ASCII space.
        if end < text.len() && !text.as_bytes()[end].is_ascii_whitespace() {
            if let Some(space) = text[start..end].rfind(' ') {
                if space >= min_len {
                    end = start + space;
                }
            }
        }

        if end <= start {
            break;
        }

        let content = text[start..end].trim().to_string();
        if !content.is_empty() {
            chunks.push(TextChunk {
                index: chunks.len() as i32,
                language_tag: detect_language_tag(&content).to_string(),
                token_estimate: estimate_tokens(&content),
                content,
                start_offset: start,
                end_offset: end,
            });
        }

        if end >= text.len() {
            break;
        }

        let step = (end - start).saturating_sub(config.overlap_chars).max(1);
        start = find_char_boundary_after(&text, start + step);
    }

    chunks
}
