//! Validated paper records produced by a [`PaperSource`](crate::source::PaperSource).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bibliographic metadata carried alongside a paper's text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperMetadata {
    /// Author names in listed order.
    #[serde(default)]
    pub authors: Vec<String>,
    /// Venue or proceeding, when known.
    #[serde(default)]
    pub venue: Option<String>,
    /// Landing page for the paper.
    #[serde(default)]
    pub url: Option<String>,
    /// Direct PDF link.
    #[serde(default)]
    pub pdf_url: Option<String>,
    /// arXiv identifier (e.g. `1706.03762`).
    #[serde(default)]
    pub arxiv_id: Option<String>,
    /// Publication date as reported by the source (usually `YYYY-MM-DD`).
    #[serde(default)]
    pub published: Option<String>,
}

/// Reasons a paper record is rejected at construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaperError {
    /// The identifier is empty or whitespace.
    #[error("paper id must not be empty")]
    EmptyId,
    /// The identifier contains the chunk separator.
    #[error("paper id `{0}` must not contain '#'")]
    ReservedSeparator(String),
}

/// An academic paper ready for chunking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPaper")]
pub struct Paper {
    id: String,
    title: String,
    #[serde(rename = "abstract")]
    abstract_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<String>,
    metadata: PaperMetadata,
}

impl Paper {
    /// Validates and builds a paper. The id must be non-empty and free of `#`,
    /// since it prefixes every chunk identifier.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        abstract_text: impl Into<String>,
    ) -> Result<Self, PaperError> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(PaperError::EmptyId);
        }
        if id.contains('#') {
            return Err(PaperError::ReservedSeparator(id));
        }
        Ok(Self {
            id,
            title: title.into(),
            abstract_text: abstract_text.into(),
            body: None,
            metadata: PaperMetadata::default(),
        })
    }

    /// Attaches full body text. Empty bodies are ignored.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        let body = body.into();
        self.body = if body.trim().is_empty() {
            None
        } else {
            Some(body)
        };
        self
    }

    /// Attaches bibliographic metadata.
    pub fn with_metadata(mut self, metadata: PaperMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Stable identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Paper title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Abstract text.
    pub fn abstract_text(&self) -> &str {
        &self.abstract_text
    }

    /// Optional full text.
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// Bibliographic metadata.
    pub fn metadata(&self) -> &PaperMetadata {
        &self.metadata
    }

    /// Text that gets chunked: the abstract, then the body after a blank line.
    pub fn content(&self) -> String {
        match &self.body {
            Some(body) => format!("{}\n\n{}", self.abstract_text, body),
            None => self.abstract_text.clone(),
        }
    }
}

#[derive(Deserialize)]
struct RawPaper {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(rename = "abstract", default)]
    abstract_text: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    metadata: PaperMetadata,
}

impl TryFrom<RawPaper> for Paper {
    type Error = PaperError;

    fn try_from(raw: RawPaper) -> Result<Self, Self::Error> {
        let paper = Paper::new(raw.id, raw.title, raw.abstract_text)?.with_metadata(raw.metadata);
        Ok(match raw.body {
            Some(body) => paper.with_body(body),
            None => paper,
        })
    }
}
