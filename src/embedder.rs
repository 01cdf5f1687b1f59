//! Embedding model seam plus the batching, retrying client the pipeline and
//! retriever share.

pub mod openai;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::error::RemoteError;
use crate::retry::{RetryFailure, RetryPolicy};

/// Remote model that turns text into fixed-dimension vectors.
///
/// Implementations make exactly one attempt per call and classify failures;
/// retrying is the caller's job.
pub trait Embedder: Send + Sync {
    /// Model identifier recorded alongside every vector.
    fn model(&self) -> &str;

    /// Vector length, when known before the first call.
    fn dimensions(&self) -> Option<usize>;

    /// Embeds `inputs`, returning one vector per input in the same order.
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, RemoteError>;
}

impl<T: Embedder + ?Sized> Embedder for Arc<T> {
    fn model(&self) -> &str {
        (**self).model()
    }

    fn dimensions(&self) -> Option<usize> {
        (**self).dimensions()
    }

    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, RemoteError> {
        (**self).embed_batch(inputs)
    }
}

/// Provenance stored with an index: every vector in it came from this model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model identifier.
    pub model: String,
    /// Vector length.
    pub dimension: usize,
}

/// A batch that could not be embedded, with the inputs it covered.
#[derive(Debug, Clone, Error)]
#[error("embedding batch starting at input {first_input} ({len} inputs) failed: {failure}")]
pub struct BatchFailure {
    /// Index of the first input in the failed batch.
    pub first_input: usize,
    /// Number of inputs in the batch.
    pub len: usize,
    /// What went wrong.
    pub failure: RetryFailure,
}

/// Wraps an [`Embedder`] with batching, retry and response validation.
#[derive(Debug, Clone)]
pub struct EmbeddingClient<E> {
    embedder: E,
    batch_size: usize,
    retry: RetryPolicy,
}

impl<E: Embedder> EmbeddingClient<E> {
    /// Builds a client. A zero batch size is treated as one.
    pub fn new(embedder: E, batch_size: usize, retry: RetryPolicy) -> Self {
        Self {
            embedder,
            batch_size: batch_size.max(1),
            retry,
        }
    }

    /// The wrapped embedder.
    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    /// Model identifier of the wrapped embedder.
    pub fn model(&self) -> &str {
        self.embedder.model()
    }

    /// Declared dimension of the wrapped embedder, if any.
    pub fn dimensions(&self) -> Option<usize> {
        self.embedder.dimensions()
    }

    /// Maximum inputs sent per request.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Embeds one batch (no larger than [`batch_size`](Self::batch_size)),
    /// retrying transient failures and validating the response shape.
    pub fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, RetryFailure> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        self.retry.run(self.embedder.model(), |attempt| {
            debug!(inputs = inputs.len(), attempt, "embedding batch");
            let vectors = self.embedder.embed_batch(inputs)?;
            self.validate(inputs.len(), &vectors)?;
            Ok(vectors)
        })
    }

    /// Embeds inputs in consecutive batches and reports each batch's outcome
    /// separately, so callers can attribute failures to the inputs involved.
    pub fn embed_batches(&self, inputs: &[&str]) -> Vec<Result<Vec<Vec<f32>>, BatchFailure>> {
        inputs
            .chunks(self.batch_size)
            .enumerate()
            .map(|(batch_no, batch)| {
                self.embed_batch(batch).map_err(|failure| BatchFailure {
                    first_input: batch_no * self.batch_size,
                    len: batch.len(),
                    failure,
                })
            })
            .collect()
    }

    /// Embeds every input, one vector per input in order, or the first
    /// failing batch.
    pub fn embed_texts(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, BatchFailure> {
        let mut vectors = Vec::with_capacity(inputs.len());
        for batch in self.embed_batches(inputs) {
            vectors.extend(batch?);
        }
        Ok(vectors)
    }

    fn validate(&self, expected: usize, vectors: &[Vec<f32>]) -> Result<(), RemoteError> {
        let service = "embeddings";
        if vectors.len() != expected {
            return Err(RemoteError::protocol(
                service,
                format!("{} vectors returned for {} inputs", vectors.len(), expected),
            ));
        }
        let dimension = self
            .embedder
            .dimensions()
            .or_else(|| vectors.first().map(Vec::len))
            .unwrap_or(0);
        if dimension == 0 {
            return Err(RemoteError::protocol(service, "empty embedding vector"));
        }
        if let Some(bad) = vectors.iter().find(|vector| vector.len() != dimension) {
            return Err(RemoteError::protocol(
                service,
                format!("vector of length {} where {} was expected", bad.len(), dimension),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Scripted {
        calls: AtomicUsize,
        fail_first: usize,
        dimension: usize,
        short_by: usize,
    }

    impl Scripted {
        fn new(fail_first: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_first,
                dimension: 3,
                short_by: 0,
            }
        }
    }

    impl Embedder for Scripted {
        fn model(&self) -> &str {
            "scripted"
        }

        fn dimensions(&self) -> Option<usize> {
            Some(self.dimension)
        }

        fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, RemoteError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(RemoteError::Transient {
                    service: "scripted",
                    message: "rate limited".into(),
                });
            }
            Ok(inputs
                .iter()
                .skip(self.short_by)
                .map(|text| vec![text.len() as f32; self.dimension])
                .collect())
        }
    }

    fn policy(attempts: usize) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::ZERO, Duration::ZERO)
    }

    #[test]
    fn preserves_input_order_across_batches() {
        let client = EmbeddingClient::new(Scripted::new(0), 2, policy(1));
        let vectors = client.embed_texts(&["a", "bb", "ccc", "dddd", "eeeee"]).unwrap();
        let firsts: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
        assert_eq!(firsts, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn retries_transient_failures() {
        let embedder = Scripted::new(2);
        let client = EmbeddingClient::new(embedder, 8, policy(3));
        assert!(client.embed_batch(&["x"]).is_ok());
        assert_eq!(client.embedder.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn count_mismatch_is_a_protocol_error() {
        let mut embedder = Scripted::new(0);
        embedder.short_by = 1;
        let client = EmbeddingClient::new(embedder, 8, policy(3));
        let err = client.embed_batch(&["x", "y"]).unwrap_err();
        assert!(!err.is_exhausted());
        assert!(matches!(err.remote(), RemoteError::Protocol { .. }));
    }

    #[test]
    fn batch_failures_report_their_inputs() {
        let client = EmbeddingClient::new(Scripted::new(1), 2, policy(1));
        let results = client.embed_batches(&["a", "b", "c"]);
        assert_eq!(results.len(), 2);
        let failure = results[0].as_ref().unwrap_err();
        assert_eq!((failure.first_input, failure.len), (0, 2));
        assert!(results[1].is_ok());
    }
}
