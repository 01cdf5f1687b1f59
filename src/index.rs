//! Vector store seam: idempotent upsert and top-k similarity query keyed by
//! [`ChunkId`].

pub mod memory;
pub mod upstash;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::chunker::ChunkId;
use crate::embedder::EmbeddingConfig;
use crate::error::{RagError, RemoteError};

pub use memory::InMemoryIndex;
pub use upstash::UpstashIndex;

/// Largest `k` a query may request unless the store says otherwise.
pub const DEFAULT_MAX_TOP_K: usize = 1000;

/// A store holding vectors with no recorded embedding model cannot be checked
/// against the current one, so it is neither queried nor extended.
pub(crate) fn missing_provenance(vector_count: usize) -> RagError {
    RagError::config(format!(
        "index has entries but no embedding provenance ({vector_count} vectors); \
         re-index into an empty index"
    ))
}

/// Similarity function used to rank entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DistanceMetric {
    /// Cosine of the angle between vectors.
    Cosine,
    /// Raw inner product.
    DotProduct,
    /// Euclidean distance mapped into `(0, 1]` as `1 / (1 + d^2)`.
    Euclidean,
}

impl DistanceMetric {
    /// Similarity score between two vectors; larger means closer.
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::Cosine => {
                let norm_a = dot(a, a).sqrt();
                let norm_b = dot(b, b).sqrt();
                if norm_a == 0.0 || norm_b == 0.0 {
                    0.0
                } else {
                    dot(a, b) / (norm_a * norm_b)
                }
            }
            Self::DotProduct => dot(a, b),
            Self::Euclidean => {
                let squared: f32 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
                1.0 / (1.0 + squared)
            }
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Chunk text plus the parent paper metadata stored next to each vector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryPayload {
    /// Chunk text.
    pub text: String,
    /// Parent paper identifier.
    pub paper_id: String,
    /// Chunk position within the paper.
    pub ordinal: usize,
    /// Paper title.
    #[serde(default)]
    pub title: String,
    /// Paper authors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    /// Paper landing page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Paper PDF link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
    /// Publication date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
    /// Model that produced the vector.
    #[serde(default)]
    pub embedding_model: String,
}

/// One stored record. Re-upserting the same id replaces it wholesale.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    /// Chunk identifier.
    pub id: ChunkId,
    /// Embedding vector.
    pub vector: Vec<f32>,
    /// Text and metadata.
    pub payload: EntryPayload,
}

/// A query hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEntry {
    /// Chunk identifier.
    pub id: ChunkId,
    /// Similarity under the store's metric.
    pub score: f32,
    /// Text and metadata.
    pub payload: EntryPayload,
}

/// Store statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    /// Number of chunk entries.
    pub vector_count: usize,
    /// Vector length, if the store has one fixed.
    pub dimension: Option<usize>,
    /// Similarity function, if known.
    pub metric: Option<DistanceMetric>,
}

/// Remote or local key-vector store.
///
/// Implementations make one attempt per call; callers wrap them in a
/// [`RetryPolicy`](crate::retry::RetryPolicy).
pub trait VectorIndex: Send + Sync {
    /// Inserts or replaces entries by id.
    fn upsert(&self, entries: &[IndexEntry]) -> Result<(), RemoteError>;

    /// Returns up to `top_k` entries, most similar first.
    fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredEntry>, RemoteError>;

    /// Removes every chunk of `paper_id`, returning how many were removed.
    fn delete_paper(&self, paper_id: &str) -> Result<usize, RemoteError>;

    /// Entry count, dimension and metric.
    fn info(&self) -> Result<IndexInfo, RemoteError>;

    /// Embedding provenance recorded by an earlier indexing run.
    fn load_config(&self) -> Result<Option<EmbeddingConfig>, RemoteError>;

    /// Records embedding provenance.
    fn store_config(&self, config: &EmbeddingConfig) -> Result<(), RemoteError>;

    /// Upper bound on `top_k`.
    fn max_top_k(&self) -> usize {
        DEFAULT_MAX_TOP_K
    }
}

impl<T: VectorIndex + ?Sized> VectorIndex for Arc<T> {
    fn upsert(&self, entries: &[IndexEntry]) -> Result<(), RemoteError> {
        (**self).upsert(entries)
    }

    fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredEntry>, RemoteError> {
        (**self).query(vector, top_k)
    }

    fn delete_paper(&self, paper_id: &str) -> Result<usize, RemoteError> {
        (**self).delete_paper(paper_id)
    }

    fn info(&self) -> Result<IndexInfo, RemoteError> {
        (**self).info()
    }

    fn load_config(&self) -> Result<Option<EmbeddingConfig>, RemoteError> {
        (**self).load_config()
    }

    fn store_config(&self, config: &EmbeddingConfig) -> Result<(), RemoteError> {
        (**self).store_config(config)
    }

    fn max_top_k(&self) -> usize {
        (**self).max_top_k()
    }
}
