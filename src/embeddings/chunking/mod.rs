#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::documents::Document;

/// A window of a document's text, ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Identifier of the source document
    pub source: String,
    /// The index of this chunk within the document
    pub chunk_index: usize,
    /// Start offset in characters (inclusive)
    pub start: usize,
    /// End offset in characters (exclusive)
    pub end: usize,
    /// The chunk text
    pub text: String,
}

impl Chunk {
    #[inline]
    pub fn char_len(&self) -> usize {
        self.end - self.start
    }
}

/// Where a window may end
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChunkBoundary {
    /// Cut exactly every `chunk_size` characters
    #[default]
    Character,
    /// Pull the cut back to the last whitespace in the window when there is one
    Word,
}

/// Configuration for content chunking
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Window length in characters
    pub chunk_size: usize,
    /// Characters shared by consecutive windows, always smaller than `chunk_size`
    pub overlap: usize,
    pub boundary: ChunkBoundary,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap: 200,
            boundary: ChunkBoundary::Character,
        }
    }
}

impl ChunkingConfig {
    /// Distance between the starts of consecutive windows
    #[inline]
    pub fn step(&self) -> usize {
        self.chunk_size.saturating_sub(self.overlap).max(1)
    }
}

/// Splits documents into overlapping windows with a fixed configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    #[inline]
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    #[inline]
    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    #[inline]
    pub fn split(&self, document: &Document) -> Vec<Chunk> {
        chunk_document(document, &self.config)
    }

    #[inline]
    pub fn split_text(&self, source: &str, text: &str) -> Vec<Chunk> {
        chunk_text(source, text, &self.config)
    }
}

/// Chunk a loaded document
#[inline]
pub fn chunk_document(document: &Document, config: &ChunkingConfig) -> Vec<Chunk> {
    let chunks = chunk_text(&document.id, &document.text, config);

    debug!(
        "Chunked document '{}' ({} chars) into {} chunks",
        document.id,
        document.text.chars().count(),
        chunks.len()
    );

    chunks
}

/// Slide a `chunk_size` window over `text`, advancing by `chunk_size - overlap`.
///
/// Offsets count Unicode scalar values, so a window never ends inside a
/// multi-byte character. The final window is truncated to the remaining text.
#[inline]
pub fn chunk_text(source: &str, text: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }

    let chunk_size = config.chunk_size.max(1);
    let overlap = config.overlap.min(chunk_size - 1);

    let mut chunks = Vec::with_capacity(chars.len() / config.step() + 1);
    let mut start = 0;

    loop {
        let hard_end = (start + chunk_size).min(chars.len());
        let end = if hard_end < chars.len() && config.boundary == ChunkBoundary::Word {
            word_boundary_end(&chars, start + overlap + 1, hard_end)
        } else {
            hard_end
        };

        chunks.push(Chunk {
            source: source.to_string(),
            chunk_index: chunks.len(),
            start,
            end,
            text: chars[start..end].iter().collect(),
        });

        if end >= chars.len() {
            break;
        }
        start = end - overlap;
    }

    chunks
}

/// Latest cut in `min_end..=hard_end` that directly follows whitespace,
/// or `hard_end` when the window has none.
fn word_boundary_end(chars: &[char], min_end: usize, hard_end: usize) -> usize {
    (min_end..=hard_end)
        .rev()
        .find(|&end| chars[end - 1].is_whitespace())
        .unwrap_or(hard_end)
}

/// Rebuild the original text from consecutive chunks of one document
#[inline]
pub fn reassemble(chunks: &[Chunk]) -> String {
    let mut text = String::new();
    let mut covered: usize = 0;

    for chunk in chunks {
        let skip = covered.saturating_sub(chunk.start);
        text.extend(chunk.text.chars().skip(skip));
        covered = chunk.end;
    }

    text
}
