//! Papers-with-Code search API client.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{PaperSource, SourceError};
use crate::error::{RagError, RagResult, RemoteError};
use crate::paper::{Paper, PaperMetadata};
use crate::retry::RetryPolicy;

const SERVICE: &str = "papers-with-code";

/// Default API root.
pub const DEFAULT_PAPERS_API: &str = "https://paperswithcode.com/api/v1";

/// Largest page the API serves.
const MAX_PAGE_SIZE: usize = 50;

/// Searches `{base}/papers/?q=...` and pages until enough papers are found.
pub struct PapersWithCodeSource {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl PapersWithCodeSource {
    /// Builds a client against `base_url`.
    pub fn new(base_url: &str, timeout: Duration, retry: RetryPolicy) -> RagResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("paperrag/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| RagError::config(format!("failed to build search HTTP client: {err}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
        })
    }

    fn fetch_page(&self, query: &str, page: usize, page_size: usize) -> Result<SearchPage, RemoteError> {
        let endpoint = format!("{}/papers/", self.base_url);
        let resp = self
            .client
            .get(&endpoint)
            .query(&[
                ("q", query.to_string()),
                ("items_per_page", page_size.to_string()),
                ("page", page.to_string()),
            ])
            .send()
            .map_err(|err| RemoteError::from_reqwest(SERVICE, err))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(RemoteError::from_status(SERVICE, status, body));
        }
        resp.json()
            .map_err(|err| RemoteError::from_reqwest(SERVICE, err))
    }
}

impl PaperSource for PapersWithCodeSource {
    fn name(&self) -> &str {
        SERVICE
    }

    fn search(&self, query: &str, max_results: usize) -> Result<Vec<Paper>, SourceError> {
        let page_size = max_results.clamp(1, MAX_PAGE_SIZE);
        let mut papers = Vec::with_capacity(max_results);
        let mut page = 1usize;
        let mut seen = 0usize;
        while papers.len() < max_results {
            let result = self
                .retry
                .run(SERVICE, |_| self.fetch_page(query, page, page_size))?;
            debug!(page, results = result.results.len(), "fetched search page");
            let exhausted = result.next.is_none() || result.results.is_empty();
            for record in result.results {
                seen += 1;
                if papers.len() >= max_results {
                    break;
                }
                match record.into_paper() {
                    Ok(Some(paper)) => papers.push(paper),
                    Ok(None) => debug!("skipping search result without abstract"),
                    Err(err) => warn!(position = seen, error = %err, "skipping invalid search result"),
                }
            }
            if exhausted {
                break;
            }
            page += 1;
        }
        info!(query, found = papers.len(), scanned = seen, "paper search complete");
        Ok(papers)
    }
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    next: Option<String>,
    #[serde(default)]
    results: Vec<SearchRecord>,
}

#[derive(Debug, Deserialize)]
struct SearchRecord {
    id: String,
    #[serde(default)]
    arxiv_id: Option<String>,
    #[serde(default)]
    url_abs: Option<String>,
    #[serde(default)]
    url_pdf: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(rename = "abstract", default)]
    abstract_text: Option<String>,
    #[serde(default)]
    authors: Vec<String>,
    #[serde(default)]
    published: Option<String>,
    #[serde(default)]
    proceeding: Option<String>,
    #[serde(default)]
    conference: Option<String>,
}

impl SearchRecord {
    fn into_paper(self) -> Result<Option<Paper>, crate::paper::PaperError> {
        let abstract_text = match self.abstract_text {
            Some(text) if !text.trim().is_empty() => text,
            _ => return Ok(None),
        };
        let metadata = PaperMetadata {
            authors: self.authors,
            venue: self.proceeding.or(self.conference),
            url: self.url_abs,
            pdf_url: self.url_pdf,
            arxiv_id: self.arxiv_id,
            published: self.published,
        };
        let paper = Paper::new(self.id, self.title.unwrap_or_default(), abstract_text)?
            .with_metadata(metadata);
        Ok(Some(paper))
    }
}
