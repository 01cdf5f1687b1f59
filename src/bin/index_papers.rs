use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use paperrag::chunker::{ChunkConfig, Chunker};
use paperrag::logging::init_tracing;
use paperrag::source::papers_with_code::DEFAULT_PAPERS_API;
use paperrag::{
    EmbeddingClient, IndexingPipeline, IndexingReport, JsonlPaperSource, Paper, PaperSource,
    PapersWithCodeSource, PipelineOptions, ServiceArgs,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "paperrag-index",
    about = "Extract, chunk, embed and index academic papers"
)]
struct IndexCli {
    /// Search query used to find papers
    #[arg(long)]
    query: String,

    /// Read papers from a JSON Lines file instead of the search API
    #[arg(long, env = "PAPERRAG_INPUT")]
    input: Option<PathBuf>,

    /// Max number of papers to extract
    #[arg(long, env = "PAPERRAG_MAX_PAPERS", default_value_t = 5)]
    max_papers: usize,

    /// Stop issuing new embedding batches once this many chunks are selected
    #[arg(long, env = "PAPERRAG_MAX_CHUNKS")]
    max_chunks: Option<usize>,

    /// Max number of chunks to send per embedding request
    #[arg(long, env = "PAPERRAG_BATCH_SIZE", default_value_t = 32)]
    batch_size: usize,

    /// Chunk size in characters
    #[arg(long, env = "PAPERRAG_CHUNK_SIZE", default_value_t = 1200)]
    chunk_size: usize,

    /// Characters shared by consecutive chunks
    #[arg(long, env = "PAPERRAG_CHUNK_OVERLAP", default_value_t = 200)]
    chunk_overlap: usize,

    /// Number of concurrent embedding workers
    #[arg(long, env = "PAPERRAG_WORKERS", default_value_t = 2)]
    workers: usize,

    /// Delete a paper's existing chunks before re-indexing it
    #[arg(long, default_value_t = false)]
    purge_stale: bool,

    /// Extract and chunk only; no embedding or index calls
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Papers-with-Code API root
    #[arg(long, env = "PAPERRAG_PAPERS_API", default_value = DEFAULT_PAPERS_API)]
    papers_api_url: String,

    #[command(flatten)]
    service: ServiceArgs,
}

fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = IndexCli::parse();
    let chunking = ChunkConfig {
        chunk_size: cli.chunk_size,
        chunk_overlap: cli.chunk_overlap,
    };
    chunking.validate().context("invalid chunking settings")?;

    // Credentials are checked before any extraction work.
    let credentials = if cli.dry_run {
        None
    } else {
        Some(cli.service.credentials()?)
    };

    let papers = extract(&cli)?;
    info!(papers = papers.len(), query = %cli.query, "papers extracted");
    if papers.is_empty() {
        println!("no papers matched `{}`; nothing to index.", cli.query);
        return Ok(ExitCode::SUCCESS);
    }

    let Some(credentials) = credentials else {
        return dry_run(&papers, chunking);
    };

    let client = EmbeddingClient::new(
        cli.service.embedder(&credentials)?,
        cli.batch_size.max(1),
        cli.service.retry_policy(),
    );
    let index = cli.service.index(&credentials)?;
    let options = PipelineOptions {
        chunking,
        max_chunks: cli.max_chunks,
        workers: cli.workers.max(1),
        purge_stale: cli.purge_stale,
        retry: cli.service.retry_policy(),
    };
    let pipeline = IndexingPipeline::new(client, index, options)?;
    let report = pipeline.run(&papers).context("indexing aborted")?;
    print_report(&report);
    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn extract(cli: &IndexCli) -> Result<Vec<Paper>> {
    let max_papers = cli.max_papers.max(1);
    let papers = match &cli.input {
        Some(path) => JsonlPaperSource::new(path)
            .search(&cli.query, max_papers)
            .with_context(|| format!("failed to load papers from {:?}", path))?,
        None => PapersWithCodeSource::new(
            &cli.papers_api_url,
            cli.service.timeout(),
            cli.service.retry_policy(),
        )?
        .search(&cli.query, max_papers)
        .context("paper search failed")?,
    };
    Ok(papers)
}

fn dry_run(papers: &[Paper], chunking: ChunkConfig) -> Result<ExitCode> {
    let chunker = Chunker::new(chunking)?;
    let mut failed = 0usize;
    let mut total = 0usize;
    for paper in papers {
        match chunker.chunk_paper(paper) {
            Ok(chunks) => {
                let tokens: usize = chunks.iter().map(|chunk| chunk.token_estimate).sum();
                total += chunks.len();
                println!(
                    "{} | {} | {} chunks (~{} tokens)",
                    paper.id(),
                    paper.title(),
                    chunks.len(),
                    tokens
                );
            }
            Err(err) => {
                failed += 1;
                println!("{} | {} | failed: {}", paper.id(), paper.title(), err);
            }
        }
    }
    println!(
        "dry run: {} papers, {} chunks, {} failed.",
        papers.len(),
        total,
        failed
    );
    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn print_report(report: &IndexingReport) {
    for paper in &report.papers {
        println!(
            "{} | {:?} | {}/{} chunks indexed",
            paper.paper_id, paper.state, paper.chunks_indexed, paper.chunks_total
        );
    }
    for failure in &report.failures {
        let chunk = failure
            .chunk_id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "failed: paper {} chunk {} at {}: {}",
            failure.paper_id, chunk, failure.stage, failure.reason
        );
    }
    println!(
        "indexed {} chunks from {} of {} papers ({} failed, {} skipped, {} chunks failed).",
        report.chunks_indexed,
        report.papers_indexed,
        report.papers_processed,
        report.papers_failed,
        report.papers_skipped,
        report.chunks_failed
    );
}
