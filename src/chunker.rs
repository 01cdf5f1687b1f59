//! Splits paper text into bounded, overlapping chunks ready for embedding.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::paper::Paper;

/// Separators tried in order when looking for a natural cut point.
const SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", ".", " "];

/// Chunking tuning knobs, both measured in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Maximum characters per chunk.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    pub chunk_overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1200,
            chunk_overlap: 200,
        }
    }
}

impl ChunkConfig {
    /// Checks `chunk_size > 0` and `chunk_overlap < chunk_size`.
    pub fn validate(&self) -> Result<(), ChunkError> {
        if self.chunk_size == 0 {
            return Err(ChunkError::InvalidConfig(
                "chunk size must be greater than zero".into(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ChunkError::InvalidConfig(format!(
                "chunk overlap {} must be smaller than chunk size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Errors surfaced while chunking.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    /// Size/overlap combination cannot make progress.
    #[error("invalid chunk configuration: {0}")]
    InvalidConfig(String),
    /// The text contains a control character that never appears in prose.
    #[error("malformed text: control character at byte {offset}")]
    MalformedText {
        /// Byte offset of the offending character in the paper content.
        offset: usize,
    },
}

/// Deterministic chunk identifier: `"{paper_id}#{ordinal:05}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(String);

impl ChunkId {
    /// Builds the identifier for chunk `ordinal` of `paper_id`.
    pub fn new(paper_id: &str, ordinal: usize) -> Self {
        Self(format!("{paper_id}#{ordinal:05}"))
    }

    /// Prefix shared by every chunk of `paper_id`.
    pub fn paper_prefix(paper_id: &str) -> String {
        format!("{paper_id}#")
    }

    /// Borrowed string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Paper portion of the identifier.
    pub fn paper_id(&self) -> &str {
        self.0
            .rsplit_once('#')
            .map(|(paper, _)| paper)
            .unwrap_or(&self.0)
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ChunkId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A bounded slice of one paper's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    /// Stable identifier.
    pub id: ChunkId,
    /// Parent paper.
    pub paper_id: String,
    /// Position within the paper, starting at zero.
    pub ordinal: usize,
    /// Raw chunk text (not trimmed, so offsets stay exact).
    pub text: String,
    /// Start offset (in UTF-8 code units) within the paper content.
    pub char_start: usize,
    /// Exclusive end offset within the paper content.
    pub char_end: usize,
    /// Rough token estimate (word count heuristic).
    pub token_estimate: usize,
}

/// Stateless recursive character splitter.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    config: ChunkConfig,
}

impl Chunker {
    /// Builds a chunker after validating the config.
    pub fn new(config: ChunkConfig) -> Result<Self, ChunkError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Returns the underlying config.
    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Chunks a paper's content (abstract plus optional body).
    pub fn chunk_paper(&self, paper: &Paper) -> Result<Vec<Chunk>, ChunkError> {
        self.chunk_text(paper.id(), &paper.content())
    }

    /// Chunks arbitrary text on behalf of `paper_id`.
    pub fn chunk_text(&self, paper_id: &str, text: &str) -> Result<Vec<Chunk>, ChunkError> {
        if let Some(offset) = find_malformed(text) {
            return Err(ChunkError::MalformedText { offset });
        }
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;
        let mut chunks = Vec::new();
        let mut start = 0usize;
        let mut prev_end = 0usize;
        loop {
            let limit = advance_chars(text, start, size);
            if limit >= text.len() {
                push_chunk(&mut chunks, paper_id, text, start, text.len());
                break;
            }
            // cut points inside the overlap would repeat the previous chunk
            let end = split_point(&text[start..limit], prev_end.saturating_sub(start))
                .map(|offset| start + offset)
                .unwrap_or(limit);
            push_chunk(&mut chunks, paper_id, text, start, end);
            prev_end = end;

            let next = retreat_chars(text, end, overlap);
            start = if next > start { next } else { end };
        }
        Ok(chunks)
    }
}

fn push_chunk(chunks: &mut Vec<Chunk>, paper_id: &str, text: &str, start: usize, end: usize) {
    let ordinal = chunks.len();
    let slice = &text[start..end];
    chunks.push(Chunk {
        id: ChunkId::new(paper_id, ordinal),
        paper_id: paper_id.to_string(),
        ordinal,
        text: slice.to_string(),
        char_start: start,
        char_end: end,
        token_estimate: estimate_tokens(slice),
    });
}

fn find_malformed(text: &str) -> Option<usize> {
    text.char_indices()
        .find(|(_, ch)| ch.is_ascii_control() && !matches!(ch, '\t' | '\n' | '\r' | '\x0c'))
        .map(|(idx, _)| idx)
}

/// Byte offset just after the last preferred separator in `window`, provided
/// it lands beyond `min_offset`.
fn split_point(window: &str, min_offset: usize) -> Option<usize> {
    SEPARATORS.iter().find_map(|sep| {
        window
            .rfind(sep)
            .filter(|&pos| pos > 0 && pos + sep.len() > min_offset)
            .map(|pos| pos + sep.len())
    })
}

fn advance_chars(text: &str, start: usize, count: usize) -> usize {
    text[start..]
        .char_indices()
        .nth(count)
        .map(|(idx, _)| start + idx)
        .unwrap_or(text.len())
}

fn retreat_chars(text: &str, end: usize, count: usize) -> usize {
    if count == 0 {
        return end;
    }
    text[..end]
        .char_indices()
        .rev()
        .nth(count - 1)
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}

fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count().max(1)
}
