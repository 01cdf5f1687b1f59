#![warn(missing_docs)]
//! Retrieval-augmented question answering over academic papers.
//!
//! Papers are chunked, embedded and written to a vector index by the
//! [`IndexingPipeline`]; questions are answered by a [`Retriever`] feeding an
//! [`AnswerSynthesizer`].

pub mod chunker;
pub mod config;
pub mod embedder;
pub mod error;
pub mod index;
pub mod logging;
pub mod paper;
pub mod pipeline;
pub mod retriever;
pub mod retry;
pub mod source;
pub mod synth;

pub use chunker::{Chunk, ChunkConfig, ChunkError, ChunkId, Chunker};
pub use config::{RagConfig, ServiceArgs};
pub use embedder::{Embedder, EmbeddingClient, EmbeddingConfig};
pub use error::{RagError, RagResult, RemoteError};
pub use index::{DistanceMetric, InMemoryIndex, UpstashIndex, VectorIndex};
pub use paper::{Paper, PaperMetadata};
pub use pipeline::{IndexingPipeline, IndexingReport, PaperState, PipelineOptions, Stage};
pub use retriever::{RetrievalResult, RetrievedChunk, Retriever};
pub use retry::{RetryFailure, RetryPolicy};
pub use source::{JsonlPaperSource, PaperSource, PapersWithCodeSource, SourceError};
pub use synth::{Answer, AnswerSynthesizer, Grounding, SynthesisOptions};
