//! Answer synthesis: bounded context plus question into a generative model.

pub mod context;
pub mod providers;

use serde::Serialize;
use tracing::{info, warn};

use crate::chunker::ChunkId;
use crate::error::{RagError, RagResult, RemoteError};
use crate::retriever::RetrievalResult;
use crate::retry::RetryPolicy;

use self::context::build_context;
use self::providers::{LlmProvider, ProviderRequest};

/// Reply used when retrieval found nothing; the model is not called.
pub const NO_CONTEXT_ANSWER: &str = "No relevant context was found in the indexed papers for \
this question, so I can't give a grounded answer. Try indexing papers on this topic first.";

/// Generation knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SynthesisOptions {
    /// Character budget for the rendered context.
    pub context_chars: usize,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token limit.
    pub max_tokens: usize,
    /// Optional answer length hint included in the prompt.
    pub max_words: Option<usize>,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            context_chars: 6000,
            temperature: 0.1,
            max_tokens: 400,
            max_words: None,
        }
    }
}

/// How much the answer can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Grounding {
    /// Generated from retrieved context.
    Grounded,
    /// Retrieval returned nothing.
    NoContext,
    /// The index could not be reached.
    RetrievalUnavailable,
}

/// A paper chunk cited by an answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    /// Chunk identifier.
    pub chunk_id: ChunkId,
    /// Parent paper.
    pub paper_id: String,
    /// Paper title.
    pub title: String,
    /// Paper landing page.
    pub url: Option<String>,
    /// Retrieval score.
    pub score: f32,
}

/// Final response for a question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    /// Answer text.
    pub text: String,
    /// Chunks the context was built from.
    pub sources: Vec<Source>,
    /// Exact context shown to the model (empty when it was not called).
    pub context: String,
    /// Whether the answer rests on retrieved context.
    pub grounding: Grounding,
}

impl Answer {
    fn ungrounded(text: String, grounding: Grounding) -> Self {
        Self {
            text,
            sources: Vec::new(),
            context: String::new(),
            grounding,
        }
    }
}

/// Turns retrieval results into an answer through an [`LlmProvider`].
pub struct AnswerSynthesizer<P> {
    provider: P,
    options: SynthesisOptions,
    retry: RetryPolicy,
}

impl<P: LlmProvider> AnswerSynthesizer<P> {
    /// Builds a synthesizer.
    pub fn new(provider: P, options: SynthesisOptions, retry: RetryPolicy) -> Self {
        Self {
            provider,
            options,
            retry,
        }
    }

    /// The wrapped provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Answers `query` from a retrieval outcome. An unreachable index yields a
    /// degraded answer instead of an error; other errors propagate.
    pub fn answer(&self, query: &str, retrieval: RagResult<RetrievalResult>) -> RagResult<Answer> {
        match retrieval {
            Ok(result) => self.synthesize(query, &result),
            Err(RagError::RetrievalUnavailable(reason)) => {
                warn!(%reason, "answering without retrieval");
                Ok(Answer::ungrounded(
                    format!(
                        "The paper index could not be reached ({reason}), so no grounded answer \
                         is available right now. Please try again later."
                    ),
                    Grounding::RetrievalUnavailable,
                ))
            }
            Err(err) => Err(err),
        }
    }

    /// Builds the context and prompt and calls the model. An empty result is
    /// answered without calling the model.
    pub fn synthesize(&self, query: &str, retrieval: &RetrievalResult) -> RagResult<Answer> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::InvalidInput("question must not be empty".into()));
        }
        if retrieval.is_empty() {
            info!("no context retrieved; skipping model call");
            return Ok(Answer::ungrounded(
                NO_CONTEXT_ANSWER.to_string(),
                Grounding::NoContext,
            ));
        }

        let context = build_context(&retrieval.chunks, self.options.context_chars);
        if context.truncated {
            warn!(budget = self.options.context_chars, "top chunk truncated to fit context budget");
        }
        let prompt = build_prompt(query, &context.text, self.options.max_words);
        let request = ProviderRequest {
            prompt: &prompt,
            temperature: self.options.temperature,
            max_tokens: self.options.max_tokens,
        };
        let text = self.retry.run(self.provider.name(), |_| {
            let text = self.provider.answer(&request)?;
            if text.trim().is_empty() {
                return Err(RemoteError::protocol("llm", "model returned an empty answer"));
            }
            Ok(text)
        })?;
        info!(
            provider = self.provider.name(),
            sources = context.used.len(),
            context_chars = context.text.chars().count(),
            "answer generated"
        );

        let sources = context
            .used
            .iter()
            .map(|chunk| Source {
                chunk_id: chunk.id.clone(),
                paper_id: chunk.paper_id.clone(),
                title: chunk.title.clone(),
                url: chunk.url.clone(),
                score: chunk.score,
            })
            .collect();
        Ok(Answer {
            text: text.trim().to_string(),
            sources,
            context: context.text,
            grounding: Grounding::Grounded,
        })
    }
}

/// Renders the grounded-answer prompt.
pub fn build_prompt(question: &str, context_block: &str, max_words: Option<usize>) -> String {
    let mut prompt = String::new();
    prompt.push_str("Your task is to answer a question about academic papers using only the given context. Do not invent anything that is outside of the context.\n\n");
    prompt.push_str("Context:\n");
    prompt.push_str(context_block);
    prompt.push_str("\nQuestion:\n");
    prompt.push_str(question);
    prompt.push_str("\n\nInstructions:\n1. Answer in your own words; do not copy the context.\n2. Cite supporting papers by id as [paper_id].\n3. If the context does not answer the question, say so plainly.\n");
    if let Some(limit) = max_words {
        prompt.push_str(&format!("4. Limit the answer to roughly {limit} words.\n"));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retriever::RetrievedChunk;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Recording {
        prompts: Mutex<Vec<String>>,
        reply: &'static str,
    }

    impl Recording {
        fn new(reply: &'static str) -> Self {
            Self {
                prompts: Mutex::new(Vec::new()),
                reply,
            }
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    impl LlmProvider for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        fn answer(&self, request: &ProviderRequest<'_>) -> Result<String, RemoteError> {
            self.prompts.lock().unwrap().push(request.prompt.to_string());
            Ok(self.reply.to_string())
        }
    }

    fn synthesizer(reply: &'static str) -> AnswerSynthesizer<Recording> {
        AnswerSynthesizer::new(
            Recording::new(reply),
            SynthesisOptions::default(),
            RetryPolicy::new(2, Duration::ZERO, Duration::ZERO),
        )
    }

    fn result_with_one_chunk() -> RetrievalResult {
        RetrievalResult {
            query: "What is attention?".into(),
            chunks: vec![RetrievedChunk {
                id: ChunkId::new("attention", 0),
                score: 0.88,
                text: "Attention is a mechanism that lets models focus on relevant input.".into(),
                paper_id: "attention".into(),
                ordinal: 0,
                title: "Attention Is All You Need".into(),
                url: None,
                authors: Vec::new(),
                published: None,
            }],
        }
    }

    #[test]
    fn grounded_answer_cites_sources() {
        let synth = synthesizer("Attention lets models focus [attention].");
        let answer = synth
            .synthesize("What is attention?", &result_with_one_chunk())
            .unwrap();
        assert_eq!(answer.grounding, Grounding::Grounded);
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.sources[0].paper_id, "attention");
        let prompts = synth.provider().prompts.lock().unwrap();
        assert!(prompts[0].contains("What is attention?"));
        assert!(prompts[0].contains("Attention Is All You Need"));
    }

    #[test]
    fn empty_retrieval_skips_the_model() {
        let synth = synthesizer("unused");
        let answer = synth
            .synthesize("What is attention?", &RetrievalResult::default())
            .unwrap();
        assert_eq!(answer.grounding, Grounding::NoContext);
        assert_eq!(answer.text, NO_CONTEXT_ANSWER);
        assert_eq!(synth.provider().calls(), 0);
    }

    #[test]
    fn unavailable_retrieval_degrades() {
        let synth = synthesizer("unused");
        let answer = synth
            .answer(
                "What is attention?",
                Err(RagError::RetrievalUnavailable("connection refused".into())),
            )
            .unwrap();
        assert_eq!(answer.grounding, Grounding::RetrievalUnavailable);
        assert!(answer.text.contains("connection refused"));
        assert_eq!(synth.provider().calls(), 0);
    }

    #[test]
    fn configuration_errors_propagate() {
        let synth = synthesizer("unused");
        let result = synth.answer("q", Err(RagError::Configuration("model mismatch".into())));
        assert!(matches!(result, Err(RagError::Configuration(_))));
    }

    #[test]
    fn blank_model_output_is_an_error() {
        let synth = synthesizer("   ");
        let err = synth
            .synthesize("What is attention?", &result_with_one_chunk())
            .unwrap_err();
        assert!(matches!(err, RagError::TransientRemote(_)));
    }

    #[test]
    fn prompt_includes_word_limit() {
        let prompt = build_prompt("q", "ctx", Some(120));
        assert!(prompt.contains("roughly 120 words"));
    }
}
