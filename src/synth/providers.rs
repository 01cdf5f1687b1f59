//! Generative model backends.

mod anthropic;
mod openai;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

use crate::error::RemoteError;

/// Trait implemented by concrete LLM providers. One attempt per call.
pub trait LlmProvider: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &str;

    /// Sends `request` and returns the model's text answer.
    fn answer(&self, request: &ProviderRequest<'_>) -> Result<String, RemoteError>;
}

impl<T: LlmProvider + ?Sized> LlmProvider for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn answer(&self, request: &ProviderRequest<'_>) -> Result<String, RemoteError> {
        (**self).answer(request)
    }
}

/// Request envelope shared by the various providers.
#[derive(Debug, Clone, Copy)]
pub struct ProviderRequest<'a> {
    /// Fully rendered prompt.
    pub prompt: &'a str,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token limit.
    pub max_tokens: usize,
}
