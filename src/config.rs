//! Service credentials and shared command-line settings.

use std::fmt;
use std::time::Duration;

use clap::Args;
use url::Url;

use crate::embedder::openai::{OpenAiEmbedder, DEFAULT_OPENAI_BASE};
use crate::error::{RagError, RagResult};
use crate::index::UpstashIndex;
use crate::retry::RetryPolicy;

/// Env var holding the OpenAI API key.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
/// Env var holding the Upstash Vector REST URL.
pub const UPSTASH_URL_ENV: &str = "UPSTASH_VECTOR_REST_URL";
/// Env var holding the Upstash Vector REST token.
pub const UPSTASH_TOKEN_ENV: &str = "UPSTASH_VECTOR_REST_TOKEN";

/// Validated credentials for the embedding model and the vector store.
#[derive(Clone)]
pub struct RagConfig {
    openai_api_key: String,
    vector_url: Url,
    vector_token: String,
}

impl RagConfig {
    /// Validates raw values. Every missing variable is reported in one error,
    /// and the store URL must be http(s).
    pub fn resolve(
        openai_api_key: Option<String>,
        vector_url: Option<String>,
        vector_token: Option<String>,
    ) -> RagResult<Self> {
        let present = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
        let openai_api_key = present(openai_api_key);
        let vector_url = present(vector_url);
        let vector_token = present(vector_token);

        let missing: Vec<&str> = [
            (OPENAI_API_KEY_ENV, openai_api_key.is_none()),
            (UPSTASH_URL_ENV, vector_url.is_none()),
            (UPSTASH_TOKEN_ENV, vector_token.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, absent)| absent.then_some(name))
        .collect();
        let (Some(openai_api_key), Some(vector_url), Some(vector_token)) =
            (openai_api_key, vector_url, vector_token)
        else {
            return Err(RagError::config(format!(
                "missing environment variables: {}",
                missing.join(", ")
            )));
        };

        let vector_url = Url::parse(vector_url.trim()).map_err(|err| {
            RagError::config(format!("{UPSTASH_URL_ENV} is not a valid URL: {err}"))
        })?;
        if !matches!(vector_url.scheme(), "http" | "https") {
            return Err(RagError::config(format!(
                "{UPSTASH_URL_ENV} must be an http(s) URL, got scheme `{}`",
                vector_url.scheme()
            )));
        }
        Ok(Self {
            openai_api_key: openai_api_key.trim().to_string(),
            vector_url,
            vector_token: vector_token.trim().to_string(),
        })
    }

    /// Reads the three variables from the process environment.
    pub fn from_env() -> RagResult<Self> {
        Self::resolve(
            std::env::var(OPENAI_API_KEY_ENV).ok(),
            std::env::var(UPSTASH_URL_ENV).ok(),
            std::env::var(UPSTASH_TOKEN_ENV).ok(),
        )
    }

    /// OpenAI API key.
    pub fn openai_api_key(&self) -> &str {
        &self.openai_api_key
    }

    /// Upstash Vector REST URL.
    pub fn vector_url(&self) -> &Url {
        &self.vector_url
    }

    /// Upstash Vector REST token.
    pub fn vector_token(&self) -> &str {
        &self.vector_token
    }
}

impl fmt::Debug for RagConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RagConfig")
            .field("openai_api_key", &"<redacted>")
            .field("vector_url", &self.vector_url.as_str())
            .field("vector_token", &"<redacted>")
            .finish()
    }
}

/// Connection settings shared by the `paperrag-*` binaries.
#[derive(Args, Debug, Clone)]
pub struct ServiceArgs {
    /// OpenAI API key used for embedding calls
    #[arg(long, env = OPENAI_API_KEY_ENV, hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Upstash Vector REST URL
    #[arg(long, env = UPSTASH_URL_ENV)]
    pub upstash_url: Option<String>,

    /// Upstash Vector REST token
    #[arg(long, env = UPSTASH_TOKEN_ENV, hide_env_values = true)]
    pub upstash_token: Option<String>,

    /// Embedding model identifier (must match the one the index was built with)
    #[arg(
        long,
        env = "PAPERRAG_EMBEDDING_MODEL",
        default_value = "text-embedding-3-small"
    )]
    pub embedding_model: String,

    /// Optional dimension override when supported by the model
    #[arg(long, env = "PAPERRAG_EMBEDDING_DIMENSIONS")]
    pub embedding_dimensions: Option<usize>,

    /// Base URL for the OpenAI-compatible API
    #[arg(long, env = "PAPERRAG_OPENAI_BASE", default_value = DEFAULT_OPENAI_BASE)]
    pub openai_base_url: String,

    /// Max seconds to wait for each remote request
    #[arg(long, env = "PAPERRAG_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,

    /// Attempts per remote call for rate limits or transient errors
    #[arg(long, env = "PAPERRAG_MAX_RETRIES", default_value_t = 5)]
    pub max_retries: usize,
}

impl ServiceArgs {
    /// Validated credentials from flags or environment.
    pub fn credentials(&self) -> RagResult<RagConfig> {
        RagConfig::resolve(
            self.openai_api_key.clone(),
            self.upstash_url.clone(),
            self.upstash_token.clone(),
        )
    }

    /// Per-request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Retry policy for every remote call.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries.max(1),
            Duration::from_millis(500),
            Duration::from_secs(16),
        )
    }

    /// OpenAI embeddings client for the configured model.
    pub fn embedder(&self, config: &RagConfig) -> RagResult<OpenAiEmbedder> {
        OpenAiEmbedder::new(
            config.openai_api_key(),
            &self.openai_base_url,
            self.embedding_model.clone(),
            self.embedding_dimensions,
            self.timeout(),
        )
    }

    /// Upstash index client.
    pub fn index(&self, config: &RagConfig) -> RagResult<UpstashIndex> {
        UpstashIndex::new(config.vector_url(), config.vector_token(), self.timeout())
    }
}
