//! Query-time nearest-neighbour retrieval.

use std::num::NonZeroUsize;
use std::sync::{Mutex, OnceLock};

use lru::LruCache;
use serde::Serialize;
use tracing::{debug, info};

use crate::chunker::ChunkId;
use crate::embedder::{Embedder, EmbeddingClient, EmbeddingConfig};
use crate::error::{RagError, RagResult};
use crate::index::{missing_provenance, ScoredEntry, VectorIndex};
use crate::retry::RetryPolicy;

/// A chunk returned for a query, with its parent paper's attribution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    /// Chunk identifier.
    pub id: ChunkId,
    /// Similarity to the query; larger is closer.
    pub score: f32,
    /// Chunk text.
    pub text: String,
    /// Parent paper.
    pub paper_id: String,
    /// Position within the paper.
    pub ordinal: usize,
    /// Paper title.
    pub title: String,
    /// Paper landing page.
    pub url: Option<String>,
    /// Paper authors.
    pub authors: Vec<String>,
    /// Publication date.
    pub published: Option<String>,
}

impl From<ScoredEntry> for RetrievedChunk {
    fn from(hit: ScoredEntry) -> Self {
        let payload = hit.payload;
        Self {
            id: hit.id,
            score: hit.score,
            text: payload.text,
            paper_id: payload.paper_id,
            ordinal: payload.ordinal,
            title: payload.title,
            url: payload.url.or(payload.pdf_url),
            authors: payload.authors,
            published: payload.published,
        }
    }
}

/// Chunks for one query, most similar first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalResult {
    /// The query as asked.
    pub query: String,
    /// Hits in non-increasing score order.
    pub chunks: Vec<RetrievedChunk>,
}

impl RetrievalResult {
    fn empty(query: &str) -> Self {
        Self {
            query: query.to_string(),
            chunks: Vec::new(),
        }
    }

    /// True when nothing was retrieved.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Embeds questions and looks up the closest chunks.
pub struct Retriever<E, I> {
    embeddings: EmbeddingClient<E>,
    index: I,
    retry: RetryPolicy,
    cache: Option<Mutex<LruCache<String, Vec<f32>>>>,
    verified: OnceLock<EmbeddingConfig>,
}

impl<E: Embedder, I: VectorIndex> Retriever<E, I> {
    /// Builds a retriever; `retry` governs index calls.
    pub fn new(embeddings: EmbeddingClient<E>, index: I, retry: RetryPolicy) -> Self {
        Self {
            embeddings,
            index,
            retry,
            cache: None,
            verified: OnceLock::new(),
        }
    }

    /// Keeps up to `capacity` query embeddings in memory (0 disables caching).
    pub fn with_cache(mut self, capacity: usize) -> Self {
        self.cache = NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap)));
        self
    }

    /// The queried index.
    pub fn index(&self) -> &I {
        &self.index
    }

    /// Returns up to `k` chunks for `query`, most similar first.
    ///
    /// An index that has never been written to yields an empty result. An
    /// index built with a different embedding model is a configuration error
    /// and is detected before any similarity query is sent.
    pub fn retrieve(&self, query: &str, k: usize) -> RagResult<RetrievalResult> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(RagError::InvalidInput("query must not be empty".into()));
        }
        let top_k = k.max(1).min(self.index.max_top_k().max(1));

        let Some(config) = self.verify_config()? else {
            info!("index has no embedding config yet; nothing to retrieve");
            return Ok(RetrievalResult::empty(query));
        };

        let vector = self.embed_query(trimmed)?;
        if vector.len() != config.dimension {
            return Err(RagError::config(format!(
                "query embedding has {} dimensions but the index stores {}",
                vector.len(),
                config.dimension
            )));
        }

        let hits = self
            .retry
            .run("query", |_| self.index.query(&vector, top_k))
            .map_err(|err| RagError::RetrievalUnavailable(err.to_string()))?;
        let mut chunks: Vec<RetrievedChunk> = hits.into_iter().map(RetrievedChunk::from).collect();
        chunks.sort_by(|a, b| b.score.total_cmp(&a.score));
        chunks.truncate(top_k);
        debug!(query = trimmed, top_k, hits = chunks.len(), "retrieved chunks");
        Ok(RetrievalResult {
            query: query.to_string(),
            chunks,
        })
    }

    fn verify_config(&self) -> RagResult<Option<&EmbeddingConfig>> {
        if let Some(config) = self.verified.get() {
            return Ok(Some(config));
        }
        let stored = self
            .retry
            .run("load embedding config", |_| self.index.load_config())
            .map_err(|err| RagError::RetrievalUnavailable(err.to_string()))?;
        let Some(stored) = stored else {
            let info = self
                .retry
                .run("index info", |_| self.index.info())
                .map_err(|err| RagError::RetrievalUnavailable(err.to_string()))?;
            if info.vector_count > 0 {
                return Err(missing_provenance(info.vector_count));
            }
            return Ok(None);
        };
        let model = self.embeddings.model();
        if stored.model != model {
            return Err(RagError::config(format!(
                "index was built with embedding model `{}` but queries use `{}`",
                stored.model, model
            )));
        }
        if let Some(dimension) = self.embeddings.dimensions() {
            if dimension != stored.dimension {
                return Err(RagError::config(format!(
                    "index stores {}-dimensional vectors but `{}` produces {}",
                    stored.dimension, model, dimension
                )));
            }
        }
        Ok(Some(self.verified.get_or_init(|| stored)))
    }

    fn embed_query(&self, query: &str) -> RagResult<Vec<f32>> {
        if let Some(cache) = &self.cache {
            let hit = cache
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .get(query)
                .cloned();
            if let Some(hit) = hit {
                debug!("query embedding cache hit");
                return Ok(hit);
            }
        }

        let vector = self
            .embeddings
            .embed_batch(&[query])?
            .pop()
            .ok_or_else(|| RagError::RetrievalUnavailable("embedding model returned no vector".into()))?;

        if let Some(cache) = &self.cache {
            cache
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .put(query.to_string(), vector.clone());
        }
        Ok(vector)
    }
}
