//! OpenAI-based embedding client implementation.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::Embedder;
use crate::error::{RagError, RagResult, RemoteError};

const SERVICE: &str = "openai-embeddings";

/// Default OpenAI-compatible API root.
pub const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";

/// Blocking embeddings client that talks to OpenAI-compatible endpoints.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
}

impl OpenAiEmbedder {
    /// Builds a new OpenAI embeddings client.
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: String,
        dimensions: Option<usize>,
        timeout: Duration,
    ) -> RagResult<Self> {
        if api_key.trim().is_empty() {
            return Err(RagError::config("missing OpenAI API key"));
        }
        if model.trim().is_empty() {
            return Err(RagError::config("missing OpenAI embedding model name"));
        }
        if let (Some(requested), Some(fixed)) = (dimensions, known_dimensions(&model)) {
            if requested != fixed && !supports_dimension_override(&model) {
                return Err(RagError::config(format!(
                    "{model} always returns {fixed}-dimensional vectors; \
                     it does not accept a dimension override of {requested}"
                )));
            }
        }
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| RagError::config("invalid OpenAI API key"))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| RagError::config(format!("failed to build OpenAI HTTP client: {err}")))?;
        let endpoint = format!("{}/embeddings", base_url.trim_end_matches('/'));
        let dimensions = dimensions.or_else(|| known_dimensions(&model));
        Ok(Self {
            client,
            endpoint,
            model,
            dimensions,
        })
    }
}

impl Embedder for OpenAiEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, RemoteError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let request = EmbeddingRequest {
            model: &self.model,
            input: inputs,
            dimensions: self.dimensions.filter(|_| supports_dimension_override(&self.model)),
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .map_err(|err| RemoteError::from_reqwest(SERVICE, err))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(RemoteError::from_status(SERVICE, status, body));
        }
        let parsed: EmbeddingResponse = resp
            .json()
            .map_err(|err| RemoteError::from_reqwest(SERVICE, err))?;
        into_vectors(parsed, inputs.len())
    }
}

fn into_vectors(mut parsed: EmbeddingResponse, expected: usize) -> Result<Vec<Vec<f32>>, RemoteError> {
    parsed.data.sort_by_key(|entry| entry.index);
    if parsed.data.len() != expected {
        return Err(RemoteError::protocol(
            SERVICE,
            format!(
                "OpenAI returned {} embeddings for {} inputs",
                parsed.data.len(),
                expected
            ),
        ));
    }
    Ok(parsed
        .data
        .into_iter()
        .map(|entry| entry.embedding)
        .collect())
}

/// Output size of the public OpenAI embedding models.
pub fn known_dimensions(model: &str) -> Option<usize> {
    match model {
        "text-embedding-3-small" | "text-embedding-ada-002" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        _ => None,
    }
}

fn supports_dimension_override(model: &str) -> bool {
    model.starts_with("text-embedding-3")
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorts_response_by_index() {
        let parsed: EmbeddingResponse = serde_json::from_str(
            r#"{"object":"list","data":[
                {"object":"embedding","index":1,"embedding":[0.5,0.5]},
                {"object":"embedding","index":0,"embedding":[1.0,0.0]}
            ],"model":"text-embedding-3-small"}"#,
        )
        .unwrap();
        let vectors = into_vectors(parsed, 2).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.5, 0.5]]);
    }

    #[test]
    fn short_response_is_protocol_error() {
        let parsed: EmbeddingResponse =
            serde_json::from_str(r#"{"data":[{"index":0,"embedding":[1.0]}]}"#).unwrap();
        assert!(matches!(
            into_vectors(parsed, 3),
            Err(RemoteError::Protocol { .. })
        ));
    }

    #[test]
    fn request_omits_dimensions_when_unset() {
        let inputs = ["hello"];
        let request = EmbeddingRequest {
            model: "text-embedding-ada-002",
            input: &inputs,
            dimensions: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"model": "text-embedding-ada-002", "input": ["hello"]})
        );
    }

    fn embedder(model: &str, dimensions: Option<usize>) -> RagResult<OpenAiEmbedder> {
        OpenAiEmbedder::new(
            "sk-test",
            DEFAULT_OPENAI_BASE,
            model.into(),
            dimensions,
            Duration::from_secs(5),
        )
    }

    #[test]
    fn fixed_size_model_rejects_dimension_override() {
        assert!(matches!(
            embedder("text-embedding-ada-002", Some(256)),
            Err(RagError::Configuration(_))
        ));
        let matching = embedder("text-embedding-ada-002", Some(1536)).unwrap();
        assert_eq!(matching.dimensions(), Some(1536));
    }

    #[test]
    fn shortening_model_accepts_dimension_override() {
        let shortened = embedder("text-embedding-3-large", Some(256)).unwrap();
        assert_eq!(shortened.dimensions(), Some(256));
        let custom = embedder("local-model", Some(384)).unwrap();
        assert_eq!(custom.dimensions(), Some(384));
    }

    #[test]
    fn rejects_blank_key() {
        let result = OpenAiEmbedder::new(
            " ",
            DEFAULT_OPENAI_BASE,
            "text-embedding-3-small".into(),
            None,
            Duration::from_secs(5),
        );
        assert!(matches!(result, Err(RagError::Configuration(_))));
    }
}
