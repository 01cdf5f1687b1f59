//! Error taxonomy shared by the indexing and query paths.

use reqwest::StatusCode;
use thiserror::Error;

use crate::retry::RetryFailure;

/// Failure reported by a single call to a remote service.
///
/// Adapters never retry on their own; they classify the failure so the caller
/// (usually a [`RetryPolicy`](crate::retry::RetryPolicy)) can decide what to do.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// Network failure, timeout, rate limit or server-side error.
    #[error("{service} unavailable: {message}")]
    Transient {
        /// Short service label used in logs.
        service: &'static str,
        /// Human readable cause.
        message: String,
    },
    /// The service refused the request; resending the same payload will not help.
    #[error("{service} rejected request ({status}): {body}")]
    Rejected {
        /// Short service label used in logs.
        service: &'static str,
        /// HTTP status code.
        status: u16,
        /// Response body (or a placeholder when unreadable).
        body: String,
    },
    /// The service answered with something we could not interpret.
    #[error("{service} returned an unexpected response: {message}")]
    Protocol {
        /// Short service label used in logs.
        service: &'static str,
        /// What was wrong with the payload.
        message: String,
    },
}

impl RemoteError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Label of the service that produced the error.
    pub fn service(&self) -> &'static str {
        match self {
            Self::Transient { service, .. }
            | Self::Rejected { service, .. }
            | Self::Protocol { service, .. } => service,
        }
    }

    pub(crate) fn protocol(service: &'static str, message: impl Into<String>) -> Self {
        Self::Protocol {
            service,
            message: message.into(),
        }
    }

    /// Classifies a transport-level reqwest error. Undecodable bodies are
    /// protocol errors; everything else (timeouts, resets, DNS) is transient.
    pub(crate) fn from_reqwest(service: &'static str, err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::protocol(service, err.to_string());
        }
        Self::Transient {
            service,
            message: err.to_string(),
        }
    }

    /// Classifies a non-success HTTP status. 429 and 5xx are retryable.
    pub(crate) fn from_status(service: &'static str, status: StatusCode, body: String) -> Self {
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Self::Transient {
                service,
                message: format!("{status}: {body}"),
            }
        } else {
            Self::Rejected {
                service,
                status: status.as_u16(),
                body,
            }
        }
    }
}

/// Top-level error surfaced by the pipeline, retriever and synthesizer.
#[derive(Debug, Error)]
pub enum RagError {
    /// A remote call kept failing after the retry policy gave up (or failed
    /// in a way that could not be retried).
    #[error("remote call failed: {0}")]
    TransientRemote(#[from] RetryFailure),
    /// Missing credentials, invalid parameters, or an embedding model that does
    /// not match the one the index was built with.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Some papers or chunks could not be indexed; the rest were.
    #[error("{failed_papers} paper(s) failed indexing ({failed_chunks} chunk(s) lost)")]
    PartialIndexing {
        /// Papers whose final state is `Failed`.
        failed_papers: usize,
        /// Chunks that never reached the index.
        failed_chunks: usize,
    },
    /// The vector store could not be reached at query time.
    #[error("retrieval unavailable: {0}")]
    RetrievalUnavailable(String),
    /// Caller supplied an unusable argument (empty query, malformed record).
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Convenience alias used across the crate.
pub type RagResult<T> = Result<T, RagError>;

impl RagError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}
