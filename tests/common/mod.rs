//! In-memory fakes shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use paperrag::embedder::EmbeddingConfig;
use paperrag::index::{IndexEntry, IndexInfo, ScoredEntry};
use paperrag::synth::providers::{LlmProvider, ProviderRequest};
use paperrag::{
    Embedder, EmbeddingClient, InMemoryIndex, Paper, RemoteError, RetryPolicy, VectorIndex,
};

/// Installs a test-writer subscriber once per binary.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Feature-hashed bag of words, L2-normalised. Texts sharing words land close.
pub struct HashingEmbedder {
    model: String,
    dimensions: usize,
    calls: AtomicUsize,
}

impl HashingEmbedder {
    pub fn new(model: &str, dimensions: usize) -> Self {
        Self {
            model: model.to_string(),
            dimensions,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for word in text
            .split(|ch: char| !ch.is_alphanumeric())
            .filter(|word| !word.is_empty())
        {
            let bucket = fnv1a(&word.to_lowercase()) as usize % self.dimensions;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        } else {
            vector[0] = 1.0;
        }
        vector
    }
}

impl Embedder for HashingEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> Option<usize> {
        Some(self.dimensions)
    }

    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(inputs.iter().map(|text| self.embed_one(text)).collect())
    }
}

fn fnv1a(word: &str) -> u64 {
    word.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

/// Wraps an [`InMemoryIndex`] and counts similarity queries.
#[derive(Default)]
pub struct CountingIndex {
    inner: InMemoryIndex,
    queries: AtomicUsize,
}

impl CountingIndex {
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

impl VectorIndex for CountingIndex {
    fn upsert(&self, entries: &[IndexEntry]) -> Result<(), RemoteError> {
        self.inner.upsert(entries)
    }

    fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredEntry>, RemoteError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.query(vector, top_k)
    }

    fn delete_paper(&self, paper_id: &str) -> Result<usize, RemoteError> {
        self.inner.delete_paper(paper_id)
    }

    fn info(&self) -> Result<IndexInfo, RemoteError> {
        self.inner.info()
    }

    fn load_config(&self) -> Result<Option<EmbeddingConfig>, RemoteError> {
        self.inner.load_config()
    }

    fn store_config(&self, config: &EmbeddingConfig) -> Result<(), RemoteError> {
        self.inner.store_config(config)
    }
}

/// Echoes a fixed reply and records every prompt.
pub struct FakeLlm {
    reply: String,
    prompts: Mutex<Vec<String>>,
}

impl FakeLlm {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl LlmProvider for FakeLlm {
    fn name(&self) -> &str {
        "fake-llm"
    }

    fn answer(&self, request: &ProviderRequest<'_>) -> Result<String, RemoteError> {
        self.prompts.lock().unwrap().push(request.prompt.to_string());
        Ok(self.reply.clone())
    }
}

pub const MODEL: &str = "hashing-v1";
pub const DIMENSIONS: usize = 1024;

pub fn client(model: &str) -> EmbeddingClient<Arc<HashingEmbedder>> {
    EmbeddingClient::new(
        Arc::new(HashingEmbedder::new(model, DIMENSIONS)),
        4,
        RetryPolicy::no_retry(),
    )
}

pub fn paper(id: &str, title: &str, abstract_text: &str) -> Paper {
    Paper::new(id, title, abstract_text).unwrap()
}

/// Three short papers on unrelated topics.
pub fn corpus() -> Vec<Paper> {
    vec![
        paper(
            "attention",
            "Attention Is All You Need",
            "Attention is a mechanism that lets a model weigh every input token. \
             Transformers rely on attention alone and drop recurrence entirely.",
        ),
        paper(
            "resnet",
            "Deep Residual Learning",
            "Residual connections let very deep convolutional networks train. \
             Skip paths carry gradients through hundreds of layers.",
        ),
        paper(
            "dqn",
            "Playing Atari with Deep Reinforcement Learning",
            "Agents learn control policies from raw pixels using rewards. \
             Experience replay stabilises value estimates during training.",
        ),
    ]
}
