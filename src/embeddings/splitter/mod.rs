
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

use crate::loader::Document;

/// Separators tried in order, coarsest first; the empty separator splits
/// into single characters.
const SEPARATORS: &[&str] = &["\n\n", "\n", " ", ""];

/// Configuration for optional document splitting before indexing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SplitterConfig {
    /// Split documents before indexing; off means one index entry per document
    pub enabled: bool,
    /// Maximum chunk length in characters
    pub chunk_size: usize,
    /// Characters shared between adjacent chunks
    pub chunk_overlap: usize,
}

impl Default for SplitterConfig {
    #[inline]
    fn default() -> Self {
        Self {
            enabled: false,
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

/// Recursive character splitter: break on the coarsest separator present,
/// recurse into pieces that are still too long, then merge neighbours back
/// up to the size limit with overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    #[inline]
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }

    #[inline]
    pub fn from_config(config: &SplitterConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    #[inline]
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, SEPARATORS)
    }

    /// Split every document, copying its metadata and recording the chunk
    /// position under `chunk`.
    pub fn split_documents(&self, documents: &[Document]) -> Vec<Document> {
        let mut chunks = Vec::new();

        for document in documents {
            for (index, text) in self.split_text(&document.text).into_iter().enumerate() {
                let mut metadata = document.metadata.clone();
                metadata.insert("chunk".to_string(), index.to_string());
                chunks.push(Document::new(text, metadata));
            }
        }

        debug!(
            "Split {} documents into {} chunks",
            documents.len(),
            chunks.len()
        );
        chunks
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let (index, separator) = separators
            .iter()
            .enumerate()
            .find(|(_, sep)| sep.is_empty() || text.contains(**sep))
            .map_or((separators.len(), ""), |(i, sep)| (i, *sep));
        let remaining = separators.get(index + 1..).unwrap_or_default();

        let pieces: Vec<String> = if separator.is_empty() {
            text.chars().map(String::from).collect()
        } else {
            text.split(separator)
                .filter(|piece| !piece.is_empty())
                .map(str::to_string)
                .collect()
        };

        let mut chunks = Vec::new();
        let mut pending: Vec<String> = Vec::new();

        for piece in pieces {
            if char_len(&piece) <= self.chunk_size {
                pending.push(piece);
                continue;
            }

            if !pending.is_empty() {
                chunks.extend(self.merge(&pending, separator));
                pending.clear();
            }

            if remaining.is_empty() {
                chunks.push(piece);
            } else {
                chunks.extend(self.split_recursive(&piece, remaining));
            }
        }

        if !pending.is_empty() {
            chunks.extend(self.merge(&pending, separator));
        }

        chunks
    }

    fn merge(&self, pieces: &[String], separator: &str) -> Vec<String> {
        let separator_len = char_len(separator);
        let mut chunks = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        // Length of the window joined with the separator
        let mut total = 0;

        for piece in pieces {
            let len = char_len(piece);
            let joiner = if window.is_empty() { 0 } else { separator_len };

            if total + joiner + len > self.chunk_size && !window.is_empty() {
                push_joined(&mut chunks, &window, separator);

                while !window.is_empty()
                    && (total > self.chunk_overlap
                        || total + separator_len + len > self.chunk_size)
                {
                    let shared_joiner = if window.len() > 1 { separator_len } else { 0 };
                    if let Some(removed) = window.pop_front() {
                        total -= char_len(removed) + shared_joiner;
                    }
                }
            }

            total += len + if window.is_empty() { 0 } else { separator_len };
            window.push_back(piece);
        }

        push_joined(&mut chunks, &window, separator);
        chunks
    }
}

fn push_joined(chunks: &mut Vec<String>, window: &VecDeque<&str>, separator: &str) {
    let joined = window.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Estimate token count for text
///
/// Takes the larger of a word-based and a character-based estimate, so text
/// without whitespace (CJK, minified markup, encoded blobs) is not undercounted.
#[inline]
pub fn estimate_token_count(text: &str) -> usize {
    // Rough heuristic: 1 token ≈ 0.75 words for English text
    // Add extra tokens for punctuation and special characters
    let word_count = text.split_whitespace().count();
    let punct_count = text.chars().filter(|c| c.is_ascii_punctuation()).count();
    let by_words = (punct_count as f64).mul_add(0.1, word_count as f64 / 0.75);

    // About 4 characters per token, but one per character for wide scripts
    let (wide, narrow) = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .fold((0_usize, 0_usize), |(wide, narrow), c| {
            if is_wide_char(c) {
                (wide + 1, narrow)
            } else {
                (wide, narrow + 1)
            }
        });
    let by_chars = narrow as f64 / 4.0 + wide as f64;

    by_words.max(by_chars) as usize
}

/// CJK ideographs, kana, Hangul and fullwidth forms
fn is_wide_char(c: char) -> bool {
    matches!(
        u32::from(c),
        0x2E80..=0x9FFF | 0xAC00..=0xD7AF | 0xF900..=0xFAFF | 0xFF00..=0xFFEF | 0x2_0000..=0x3_FFFF
    )
}
