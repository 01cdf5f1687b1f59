//! Papers read from a JSON Lines file, one [`Paper`] per line.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{query_terms, PaperSource, SourceError};
use crate::paper::Paper;

/// Offline source backed by a JSONL file.
#[derive(Debug, Clone)]
pub struct JsonlPaperSource {
    path: PathBuf,
}

impl JsonlPaperSource {
    /// Source reading `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path being read.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PaperSource for JsonlPaperSource {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn search(&self, query: &str, max_results: usize) -> Result<Vec<Paper>, SourceError> {
        let file = File::open(&self.path)?;
        let papers = read_papers(BufReader::new(file), query, max_results)?;
        info!(path = %self.path.display(), found = papers.len(), "loaded papers");
        Ok(papers)
    }
}

/// Parses papers from `reader`, keeping those whose title or abstract mention
/// every query term (all papers when the query is blank).
pub fn read_papers<R: BufRead>(
    reader: R,
    query: &str,
    max_results: usize,
) -> Result<Vec<Paper>, SourceError> {
    let terms = query_terms(query);
    let mut papers = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        if papers.len() >= max_results {
            break;
        }
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let paper: Paper = serde_json::from_str(&line).map_err(|err| SourceError::Parse {
            line: line_no + 1,
            message: err.to_string(),
        })?;
        if paper.abstract_text().trim().is_empty() {
            debug!(paper = paper.id(), "skipping paper without abstract");
            continue;
        }
        if matches_terms(&paper, &terms) {
            papers.push(paper);
        }
    }
    Ok(papers)
}

fn matches_terms(paper: &Paper, terms: &[String]) -> bool {
    if terms.is_empty() {
        return true;
    }
    let haystack = format!("{} {}", paper.title(), paper.abstract_text()).to_lowercase();
    terms.iter().all(|term| haystack.contains(term.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const FILE: &str = r#"{"id":"attention","title":"Attention Is All You Need","abstract":"Transformers rely on attention."}

{"id":"resnet","title":"Deep Residual Learning","abstract":"Residual connections ease training."}
{"id":"empty","title":"Nothing","abstract":""}
"#;

    #[test]
    fn filters_by_query_terms() {
        let papers = read_papers(Cursor::new(FILE), "attention transformers", 10).unwrap();
        let ids: Vec<&str> = papers.iter().map(Paper::id).collect();
        assert_eq!(ids, vec!["attention"]);
    }

    #[test]
    fn blank_query_returns_everything_with_an_abstract() {
        let papers = read_papers(Cursor::new(FILE), "", 10).unwrap();
        assert_eq!(papers.len(), 2);
        let capped = read_papers(Cursor::new(FILE), "", 1).unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn reports_bad_lines() {
        let err = read_papers(Cursor::new("{\"id\":\"a#1\",\"abstract\":\"x\"}\n"), "", 10)
            .unwrap_err();
        assert!(matches!(err, SourceError::Parse { line: 1, .. }));
    }
}
