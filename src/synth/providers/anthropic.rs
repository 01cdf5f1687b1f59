//! Anthropic messages API provider.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{LlmProvider, ProviderRequest};
use crate::error::{RagError, RagResult, RemoteError};

const SERVICE: &str = "anthropic";
const MESSAGES_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";

/// Anthropic messages API backend.
pub struct AnthropicProvider {
    model: String,
    client: Client,
}

impl AnthropicProvider {
    /// Builds a provider for `model`.
    pub fn new(api_key: &str, model: String, timeout: Duration) -> RagResult<Self> {
        if api_key.trim().is_empty() {
            return Err(RagError::config(
                "ANTHROPIC_API_KEY must be set for the Anthropic provider",
            ));
        }
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(api_key.trim())
                .map_err(|_| RagError::config("invalid Anthropic API key"))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| RagError::config(format!("failed to build Anthropic HTTP client: {err}")))?;
        Ok(Self { model, client })
    }
}

impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        SERVICE
    }

    fn answer(&self, request: &ProviderRequest<'_>) -> Result<String, RemoteError> {
        let body = AnthropicRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            messages: vec![AnthropicMessage {
                role: "user",
                content: vec![AnthropicContentBlock {
                    kind: "text",
                    text: request.prompt,
                }],
            }],
        };
        let resp = self
            .client
            .post(MESSAGES_ENDPOINT)
            .json(&body)
            .send()
            .map_err(|err| RemoteError::from_reqwest(SERVICE, err))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(RemoteError::from_status(SERVICE, status, text));
        }
        let parsed: AnthropicResponse = resp
            .json()
            .map_err(|err| RemoteError::from_reqwest(SERVICE, err))?;
        join_text(parsed)
    }
}

fn join_text(parsed: AnthropicResponse) -> Result<String, RemoteError> {
    let answer = parsed
        .content
        .into_iter()
        .filter_map(|block| match block {
            AnthropicResponseBlock::Text { text } => Some(text),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n");
    if answer.trim().is_empty() {
        return Err(RemoteError::protocol(SERVICE, "response missing text content"));
    }
    Ok(answer)
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    temperature: f32,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: Vec<AnthropicContentBlock<'a>>,
}

#[derive(Serialize)]
struct AnthropicContentBlock<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicResponseBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicResponseBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}
