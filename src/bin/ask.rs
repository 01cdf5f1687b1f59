use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use paperrag::logging::init_tracing;
use paperrag::synth::providers::{AnthropicProvider, LlmProvider, OpenAiProvider};
use paperrag::{
    Answer, AnswerSynthesizer, EmbeddingClient, RetrievalResult, Retriever, ServiceArgs,
    SynthesisOptions,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
/// Generative model backends.
enum ProviderArg {
    /// OpenAI chat completions.
    Openai,
    /// Anthropic messages API.
    Anthropic,
}

impl ProviderArg {
    fn default_model(self) -> &'static str {
        match self {
            Self::Openai => "gpt-3.5-turbo",
            Self::Anthropic => "claude-3-haiku-20240307",
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "paperrag-ask",
    about = "Answer a question from the indexed papers"
)]
struct AskCli {
    /// Question to answer
    #[arg(long)]
    query: String,

    /// Number of chunks to retrieve
    #[arg(long, env = "PAPERRAG_TOP_K", default_value_t = 4)]
    top_k: usize,

    /// Generative model backend
    #[arg(long, env = "PAPERRAG_LLM_PROVIDER", value_enum, default_value_t = ProviderArg::Openai)]
    llm_provider: ProviderArg,

    /// Generative model name (defaults per provider)
    #[arg(long, env = "PAPERRAG_LLM_MODEL")]
    llm_model: Option<String>,

    /// Anthropic API key, required with `--llm-provider anthropic`
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    anthropic_api_key: Option<String>,

    /// Sampling temperature
    #[arg(long, env = "PAPERRAG_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Completion token limit
    #[arg(long, env = "PAPERRAG_MAX_TOKENS", default_value_t = 400)]
    max_tokens: usize,

    /// Ask the model to keep the answer under roughly this many words
    #[arg(long)]
    max_words: Option<usize>,

    /// Character budget for the context block
    #[arg(long, env = "PAPERRAG_CONTEXT_CHARS", default_value_t = 6000)]
    context_chars: usize,

    /// Print retrieved chunks only; the generative model is not called
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Emit the answer as JSON
    #[arg(long, default_value_t = false)]
    json: bool,

    #[command(flatten)]
    service: ServiceArgs,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = AskCli::parse();
    let credentials = cli.service.credentials()?;

    let client = EmbeddingClient::new(
        cli.service.embedder(&credentials)?,
        1,
        cli.service.retry_policy(),
    );
    let retriever = Retriever::new(
        client,
        cli.service.index(&credentials)?,
        cli.service.retry_policy(),
    );
    let retrieval = retriever.retrieve(&cli.query, cli.top_k);

    if cli.dry_run {
        let result = retrieval.context("retrieval failed")?;
        print_retrieval(&result);
        return Ok(());
    }

    let provider = build_provider(&cli, credentials.openai_api_key(), cli.service.timeout())?;
    let options = SynthesisOptions {
        context_chars: cli.context_chars.max(1),
        temperature: cli.temperature,
        max_tokens: cli.max_tokens.max(1),
        max_words: cli.max_words,
    };
    let synthesizer = AnswerSynthesizer::new(provider, options, cli.service.retry_policy());
    let answer = synthesizer
        .answer(&cli.query, retrieval)
        .context("failed to answer question")?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
    } else {
        print_answer(&answer);
    }
    Ok(())
}

fn build_provider(
    cli: &AskCli,
    openai_api_key: &str,
    timeout: Duration,
) -> Result<Box<dyn LlmProvider>> {
    let model = cli
        .llm_model
        .clone()
        .unwrap_or_else(|| cli.llm_provider.default_model().to_string());
    let provider: Box<dyn LlmProvider> = match cli.llm_provider {
        ProviderArg::Openai => Box::new(OpenAiProvider::with_base_url(
            openai_api_key,
            &cli.service.openai_base_url,
            model,
            timeout,
        )?),
        ProviderArg::Anthropic => Box::new(AnthropicProvider::new(
            cli.anthropic_api_key.as_deref().unwrap_or_default(),
            model,
            timeout,
        )?),
    };
    Ok(provider)
}

fn print_retrieval(result: &RetrievalResult) {
    if result.is_empty() {
        println!("no relevant context found for `{}`.", result.query);
        return;
    }
    for (rank, chunk) in result.chunks.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} ({})",
            rank + 1,
            chunk.score,
            chunk.title,
            chunk.id
        );
        println!("   {}", chunk.text.replace('\n', " "));
    }
}

fn print_answer(answer: &Answer) {
    println!("{}", answer.text);
    if !answer.sources.is_empty() {
        println!();
        println!("Sources:");
        for source in &answer.sources {
            match &source.url {
                Some(url) => println!("- {} [{}] {}", source.title, source.paper_id, url),
                None => println!("- {} [{}]", source.title, source.paper_id),
            }
        }
    }
}
