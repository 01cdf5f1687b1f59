//! OpenAI chat completions provider.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{LlmProvider, ProviderRequest};
use crate::embedder::openai::DEFAULT_OPENAI_BASE;
use crate::error::{RagError, RagResult, RemoteError};

const SERVICE: &str = "openai-chat";

const SYSTEM_PROMPT: &str = "You answer questions about academic papers using only the provided context. \
Cite papers as [paper_id] and never invent references.";

/// OpenAI chat completions backend.
pub struct OpenAiProvider {
    model: String,
    endpoint: String,
    client: Client,
}

impl OpenAiProvider {
    /// Builds a provider for `model` against the public API.
    pub fn new(api_key: &str, model: String, timeout: Duration) -> RagResult<Self> {
        Self::with_base_url(api_key, DEFAULT_OPENAI_BASE, model, timeout)
    }

    /// Builds a provider against an OpenAI-compatible API root.
    pub fn with_base_url(
        api_key: &str,
        base_url: &str,
        model: String,
        timeout: Duration,
    ) -> RagResult<Self> {
        if api_key.trim().is_empty() {
            return Err(RagError::config("OPENAI_API_KEY must be set for the OpenAI provider"));
        }
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).map_err(|_| RagError::config("invalid OpenAI API key"))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| RagError::config(format!("failed to build OpenAI HTTP client: {err}")))?;
        Ok(Self {
            model,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            client,
        })
    }
}

impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        SERVICE
    }

    fn answer(&self, request: &ProviderRequest<'_>) -> Result<String, RemoteError> {
        let body = ChatRequest {
            model: &self.model,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: request.prompt,
                },
            ],
        };
        let resp = self
            .client
            .post(&self.endpoint)
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
        let parsed: ChatResponse = resp
            .json()
            .map_err(|err| RemoteError::from_reqwest(SERVICE, err))?;
        first_choice(parsed)
    }
}

fn first_choice(parsed: ChatResponse) -> Result<String, RemoteError> {
    parsed
        .choices
        .into_iter()
        .find_map(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| RemoteError::protocol(SERVICE, "response missing message content"))
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}
