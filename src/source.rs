//! Paper extraction collaborators.

pub mod jsonl;
pub mod papers_with_code;

use thiserror::Error;

use crate::paper::Paper;
use crate::retry::RetryFailure;

pub use jsonl::JsonlPaperSource;
pub use papers_with_code::PapersWithCodeSource;

/// Something that can look up papers for a free-text query.
///
/// Sources drop papers whose abstract is empty, since there is nothing to index.
pub trait PaperSource {
    /// Short label used in logs.
    fn name(&self) -> &str;

    /// Returns at most `max_results` papers matching `query`.
    fn search(&self, query: &str, max_results: usize) -> Result<Vec<Paper>, SourceError>;
}

/// Failures while extracting papers.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Local file could not be read.
    #[error("failed to read papers: {0}")]
    Io(#[from] std::io::Error),
    /// A record could not be parsed.
    #[error("invalid paper record at line {line}: {message}")]
    Parse {
        /// 1-based line (or result position for remote sources).
        line: usize,
        /// Parser message.
        message: String,
    },
    /// The search service kept failing.
    #[error("paper search failed: {0}")]
    Remote(#[from] RetryFailure),
}

/// Lowercased query terms used for local matching.
pub(crate) fn query_terms(query: &str) -> Vec<String> {
    query
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|term| !term.is_empty())
        .map(str::to_lowercase)
        .collect()
}
