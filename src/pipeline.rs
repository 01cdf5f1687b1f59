//! Indexing pipeline: papers → chunks → embeddings → vector index.
//!
//! Embedding batches fan out to a bounded pool of scoped worker threads. The
//! calling thread collects results in batch order and performs every upsert
//! itself, so a paper's chunks reach the index in ordinal order and all
//! bookkeeping stays single-threaded.

use std::collections::BTreeMap;
use std::fmt;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::chunker::{Chunk, ChunkConfig, ChunkId, Chunker};
use crate::embedder::{Embedder, EmbeddingClient, EmbeddingConfig};
use crate::error::{RagError, RagResult};
use crate::index::{missing_provenance, EntryPayload, IndexEntry, VectorIndex};
use crate::paper::Paper;
use crate::retry::{RetryFailure, RetryPolicy};

/// Pipeline tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    /// Chunk size and overlap.
    pub chunking: ChunkConfig,
    /// Cap on chunks indexed per run; later papers are skipped once reached.
    pub max_chunks: Option<usize>,
    /// Concurrent embedding requests.
    pub workers: usize,
    /// Delete each paper's existing chunks before re-indexing it.
    pub purge_stale: bool,
    /// Retry policy for index calls.
    pub retry: RetryPolicy,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            chunking: ChunkConfig::default(),
            max_chunks: None,
            workers: 2,
            purge_stale: false,
            retry: RetryPolicy::default(),
        }
    }
}

/// Step at which a paper or chunk failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Splitting the paper's text.
    Chunking,
    /// Removing stale entries before re-indexing.
    Purging,
    /// Calling the embedding model.
    Embedding,
    /// Writing vectors to the index.
    Upserting,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Chunking => "chunking",
            Self::Purging => "purging",
            Self::Embedding => "embedding",
            Self::Upserting => "upserting",
        };
        f.write_str(label)
    }
}

/// Where a paper ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "stage")]
pub enum PaperState {
    /// Received from the source, not yet chunked.
    Extracted,
    /// Chunks produced, embeddings pending.
    Chunked,
    /// Every chunk embedded, upserts pending.
    Embedded,
    /// Every chunk stored in the index.
    Indexed,
    /// Gave up at the given stage.
    Failed(Stage),
    /// Not processed: chunk cap reached or no content.
    Skipped,
}

/// Per-paper outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaperReport {
    /// Paper identifier.
    pub paper_id: String,
    /// Paper title.
    pub title: String,
    /// Final state.
    pub state: PaperState,
    /// Chunks selected for indexing.
    pub chunks_total: usize,
    /// Chunks with an embedding.
    pub chunks_embedded: usize,
    /// Chunks written to the index.
    pub chunks_indexed: usize,
    /// Chunks that did not reach the index.
    pub chunks_failed: usize,
    /// First error seen for this paper.
    pub error: Option<String>,
}

impl PaperReport {
    fn new(paper: &Paper) -> Self {
        Self {
            paper_id: paper.id().to_string(),
            title: paper.title().to_string(),
            state: PaperState::Extracted,
            chunks_total: 0,
            chunks_embedded: 0,
            chunks_indexed: 0,
            chunks_failed: 0,
            error: None,
        }
    }

    fn fail(&mut self, stage: Stage, reason: &str) {
        if !matches!(self.state, PaperState::Failed(_)) {
            self.state = PaperState::Failed(stage);
            self.error = Some(reason.to_string());
        }
    }
}

/// A failure attributed to one paper and, when known, one chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkFailure {
    /// Parent paper.
    pub paper_id: String,
    /// Chunk, or `None` when the whole paper failed before chunks existed.
    pub chunk_id: Option<ChunkId>,
    /// Failing step.
    pub stage: Stage,
    /// Error message.
    pub reason: String,
}

/// Summary of one pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexingReport {
    /// Papers handed to the run.
    pub papers_processed: usize,
    /// Papers whose chunks are all in the index.
    pub papers_indexed: usize,
    /// Papers that failed at some stage.
    pub papers_failed: usize,
    /// Papers skipped by the chunk cap or for lack of content.
    pub papers_skipped: usize,
    /// Chunks written to the index.
    pub chunks_indexed: usize,
    /// Chunks that never reached the index.
    pub chunks_failed: usize,
    /// One entry per input paper, in input order.
    pub papers: Vec<PaperReport>,
    /// Every recorded failure.
    pub failures: Vec<ChunkFailure>,
}

impl IndexingReport {
    fn from_parts(papers: Vec<PaperReport>, failures: Vec<ChunkFailure>) -> Self {
        let count = |pred: fn(&PaperState) -> bool| papers.iter().filter(|p| pred(&p.state)).count();
        Self {
            papers_processed: papers.len(),
            papers_indexed: count(|state| *state == PaperState::Indexed),
            papers_failed: count(|state| matches!(state, PaperState::Failed(_))),
            papers_skipped: count(|state| *state == PaperState::Skipped),
            chunks_indexed: papers.iter().map(|p| p.chunks_indexed).sum(),
            chunks_failed: papers.iter().map(|p| p.chunks_failed).sum(),
            papers,
            failures,
        }
    }

    /// True when no paper failed.
    pub fn is_success(&self) -> bool {
        self.papers_failed == 0
    }

    /// Converts a run with failures into [`RagError::PartialIndexing`].
    pub fn into_result(self) -> RagResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(RagError::PartialIndexing {
                failed_papers: self.papers_failed,
                failed_chunks: self.chunks_failed,
            })
        }
    }
}

/// Orchestrates chunking, embedding and upserting for a set of papers.
pub struct IndexingPipeline<E, I> {
    embeddings: EmbeddingClient<E>,
    index: I,
    chunker: Chunker,
    options: PipelineOptions,
}

impl<E: Embedder, I: VectorIndex> IndexingPipeline<E, I> {
    /// Builds a pipeline; fails on an invalid chunk configuration.
    pub fn new(embeddings: EmbeddingClient<E>, index: I, options: PipelineOptions) -> RagResult<Self> {
        let chunker = Chunker::new(options.chunking).map_err(|err| RagError::config(err.to_string()))?;
        Ok(Self {
            embeddings,
            index,
            chunker,
            options,
        })
    }

    /// The target index.
    pub fn index(&self) -> &I {
        &self.index
    }

    /// The embedding client.
    pub fn embeddings(&self) -> &EmbeddingClient<E> {
        &self.embeddings
    }

    /// Indexes `papers`. Per-paper failures are recorded in the report;
    /// only configuration problems and an unreachable index abort the run.
    pub fn run(&self, papers: &[Paper]) -> RagResult<IndexingReport> {
        let stored = self.reconcile_config()?;
        let mut reports: Vec<PaperReport> = papers.iter().map(PaperReport::new).collect();
        let mut failures = Vec::new();

        let work = self.prepare(papers, &mut reports, &mut failures);
        info!(
            papers = papers.len(),
            chunks = work.len(),
            batch_size = self.embeddings.batch_size(),
            workers = self.options.workers.max(1),
            "starting indexing run"
        );

        let mut collector = Collector {
            index: &self.index,
            retry: self.options.retry,
            model: self.embeddings.model(),
            papers,
            reports: &mut reports,
            failures: &mut failures,
            config: stored,
            config_stored: false,
        };
        collector.config_stored = collector.config.is_some();
        self.embed_and_upsert(&work, &mut collector)?;

        let report = IndexingReport::from_parts(reports, failures);
        info!(
            indexed = report.papers_indexed,
            failed = report.papers_failed,
            skipped = report.papers_skipped,
            chunks_indexed = report.chunks_indexed,
            chunks_failed = report.chunks_failed,
            "indexing run complete"
        );
        Ok(report)
    }

    /// Checks stored provenance against the embedder before any work.
    fn reconcile_config(&self) -> RagResult<Option<EmbeddingConfig>> {
        let stored = self
            .options
            .retry
            .run("load embedding config", |_| self.index.load_config())?;
        let Some(stored) = stored else {
            let info = self
                .options
                .retry
                .run("index info", |_| self.index.info())?;
            if info.vector_count > 0 {
                return Err(missing_provenance(info.vector_count));
            }
            return Ok(None);
        };
        let model = self.embeddings.model();
        if stored.model != model {
            return Err(RagError::config(format!(
                "index was built with embedding model `{}`, refusing to mix in `{}`",
                stored.model, model
            )));
        }
        if let Some(dimension) = self.embeddings.dimensions() {
            if dimension != stored.dimension {
                return Err(RagError::config(format!(
                    "index stores {}-dimensional vectors but `{}` produces {}",
                    stored.dimension, model, dimension
                )));
            }
        }
        Ok(Some(stored))
    }

    /// Chunks every paper, applies the chunk cap and optional purge, and
    /// returns the chunks left to embed.
    fn prepare(
        &self,
        papers: &[Paper],
        reports: &mut [PaperReport],
        failures: &mut Vec<ChunkFailure>,
    ) -> Vec<WorkItem> {
        let cap = self.options.max_chunks.unwrap_or(usize::MAX);
        let mut work = Vec::new();
        for (idx, paper) in papers.iter().enumerate() {
            let report = &mut reports[idx];
            let mut chunks = match self.chunker.chunk_paper(paper) {
                Ok(chunks) => chunks,
                Err(err) => {
                    let reason = err.to_string();
                    warn!(paper = paper.id(), error = %reason, "chunking failed");
                    report.fail(Stage::Chunking, &reason);
                    failures.push(ChunkFailure {
                        paper_id: paper.id().to_string(),
                        chunk_id: None,
                        stage: Stage::Chunking,
                        reason,
                    });
                    continue;
                }
            };
            let remaining = cap.saturating_sub(work.len());
            if chunks.is_empty() || remaining == 0 {
                debug!(paper = paper.id(), chunks = chunks.len(), "skipping paper");
                report.state = PaperState::Skipped;
                continue;
            }
            if chunks.len() > remaining {
                debug!(paper = paper.id(), kept = remaining, dropped = chunks.len() - remaining, "chunk cap reached");
                chunks.truncate(remaining);
            }
            report.state = PaperState::Chunked;
            report.chunks_total = chunks.len();

            if self.options.purge_stale {
                let purge = self
                    .options
                    .retry
                    .run("purge stale chunks", |_| self.index.delete_paper(paper.id()));
                match purge {
                    Ok(removed) => debug!(paper = paper.id(), removed, "purged stale chunks"),
                    Err(err) => {
                        let reason = err.to_string();
                        warn!(paper = paper.id(), error = %reason, "purge failed");
                        report.fail(Stage::Purging, &reason);
                        report.chunks_failed = report.chunks_total;
                        failures.push(ChunkFailure {
                            paper_id: paper.id().to_string(),
                            chunk_id: None,
                            stage: Stage::Purging,
                            reason,
                        });
                        continue;
                    }
                }
            }
            work.extend(chunks.into_iter().map(|chunk| WorkItem { paper: idx, chunk }));
        }
        work
    }

    fn embed_and_upsert(&self, work: &[WorkItem], collector: &mut Collector<'_, I>) -> RagResult<()> {
        if work.is_empty() {
            return Ok(());
        }
        let batches: Vec<&[WorkItem]> = work.chunks(self.embeddings.batch_size()).collect();
        let workers = self.options.workers.max(1).min(batches.len());
        let embeddings = &self.embeddings;

        thread::scope(|scope| {
            let (task_tx, task_rx) = bounded::<EmbedTask<'_>>(workers);
            let (result_tx, result_rx) = bounded::<EmbedOutcome>(workers);
            for worker_id in 0..workers {
                let worker_rx = task_rx.clone();
                let worker_tx = result_tx.clone();
                scope.spawn(move || worker_loop(worker_id, worker_rx, worker_tx, embeddings));
            }
            drop(task_rx);
            drop(result_tx);

            let mut pending: BTreeMap<usize, EmbedOutcome> = BTreeMap::new();
            let mut next_dispatch = 0usize;
            let mut next_collect = 0usize;
            let mut inflight = 0usize;
            while next_collect < batches.len() {
                while inflight < workers && next_dispatch < batches.len() {
                    let task = EmbedTask {
                        id: next_dispatch,
                        items: batches[next_dispatch],
                    };
                    if task_tx.send(task).is_err() {
                        return Err(RagError::config("embedding worker pool shut down unexpectedly"));
                    }
                    next_dispatch += 1;
                    inflight += 1;
                }
                let Ok(outcome) = result_rx.recv() else {
                    return Err(RagError::config("embedding worker pool shut down unexpectedly"));
                };
                inflight -= 1;
                pending.insert(outcome.id, outcome);
                while let Some(outcome) = pending.remove(&next_collect) {
                    collector.accept(batches[next_collect], outcome.result)?;
                    next_collect += 1;
                }
            }
            drop(task_tx);
            Ok(())
        })
    }
}

struct WorkItem {
    paper: usize,
    chunk: Chunk,
}

struct EmbedTask<'w> {
    id: usize,
    items: &'w [WorkItem],
}

struct EmbedOutcome {
    id: usize,
    result: Result<Vec<Vec<f32>>, RetryFailure>,
}

fn worker_loop<E: Embedder>(
    worker_id: usize,
    receiver: Receiver<EmbedTask<'_>>,
    sender: Sender<EmbedOutcome>,
    embeddings: &EmbeddingClient<E>,
) {
    for task in receiver.iter() {
        let inputs: Vec<&str> = task.items.iter().map(|item| item.chunk.text.as_str()).collect();
        debug!(worker_id, batch = task.id, chunks = inputs.len(), "embedding batch");
        let result = embeddings.embed_batch(&inputs);
        if let Err(err) = &result {
            warn!(worker_id, batch = task.id, error = %err, "embedding batch failed");
        }
        if sender
            .send(EmbedOutcome {
                id: task.id,
                result,
            })
            .is_err()
        {
            break;
        }
    }
}

/// Single-threaded sink for embedding results: records provenance, upserts,
/// and attributes failures.
struct Collector<'a, I> {
    index: &'a I,
    retry: RetryPolicy,
    model: &'a str,
    papers: &'a [Paper],
    reports: &'a mut [PaperReport],
    failures: &'a mut Vec<ChunkFailure>,
    config: Option<EmbeddingConfig>,
    config_stored: bool,
}

impl<I: VectorIndex> Collector<'_, I> {
    fn accept(
        &mut self,
        items: &[WorkItem],
        result: Result<Vec<Vec<f32>>, RetryFailure>,
    ) -> RagResult<()> {
        let vectors = match result {
            Ok(vectors) => vectors,
            Err(err) => {
                self.fail_items(items, Stage::Embedding, &err.to_string());
                return Ok(());
            }
        };
        let dimension = vectors.first().map(Vec::len).unwrap_or(0);
        match self.config.as_ref().map(|config| config.dimension) {
            Some(expected) if expected != dimension => {
                return Err(RagError::config(format!(
                    "embedding model `{}` returned {}-dimensional vectors but the index stores {}",
                    self.model, dimension, expected
                )));
            }
            Some(_) => {}
            None => {
                self.config = Some(EmbeddingConfig {
                    model: self.model.to_string(),
                    dimension,
                });
            }
        }
        for item in items {
            self.reports[item.paper].chunks_embedded += 1;
            let report = &mut self.reports[item.paper];
            if report.state == PaperState::Chunked && report.chunks_embedded == report.chunks_total {
                report.state = PaperState::Embedded;
            }
        }

        if !self.config_stored {
            if let Some(config) = self.config.clone() {
                match self.retry.run("store embedding config", |_| self.index.store_config(&config)) {
                    Ok(()) => {
                        info!(model = %config.model, dimension = config.dimension, "recorded embedding config");
                        self.config_stored = true;
                    }
                    Err(err) => {
                        self.fail_items(items, Stage::Upserting, &err.to_string());
                        return Ok(());
                    }
                }
            }
        }

        let entries: Vec<IndexEntry> = items
            .iter()
            .zip(vectors)
            .map(|(item, vector)| IndexEntry {
                id: item.chunk.id.clone(),
                vector,
                payload: payload_for(&self.papers[item.paper], &item.chunk, self.model),
            })
            .collect();
        match self.retry.run("upsert", |_| self.index.upsert(&entries)) {
            Ok(()) => {
                debug!(chunks = entries.len(), "upserted batch");
                for item in items {
                    let report = &mut self.reports[item.paper];
                    report.chunks_indexed += 1;
                    if report.state == PaperState::Embedded && report.chunks_indexed == report.chunks_total {
                        report.state = PaperState::Indexed;
                    }
                }
            }
            Err(err) => {
                warn!(chunks = entries.len(), error = %err, "upsert failed");
                self.fail_items(items, Stage::Upserting, &err.to_string());
            }
        }
        Ok(())
    }

    fn fail_items(&mut self, items: &[WorkItem], stage: Stage, reason: &str) {
        for item in items {
            let report = &mut self.reports[item.paper];
            report.chunks_failed += 1;
            report.fail(stage, reason);
            self.failures.push(ChunkFailure {
                paper_id: item.chunk.paper_id.clone(),
                chunk_id: Some(item.chunk.id.clone()),
                stage,
                reason: reason.to_string(),
            });
        }
    }
}

fn payload_for(paper: &Paper, chunk: &Chunk, model: &str) -> EntryPayload {
    let metadata = paper.metadata();
    EntryPayload {
        text: chunk.text.clone(),
        paper_id: chunk.paper_id.clone(),
        ordinal: chunk.ordinal,
        title: paper.title().to_string(),
        authors: metadata.authors.clone(),
        url: metadata.url.clone(),
        pdf_url: metadata.pdf_url.clone(),
        published: metadata.published.clone(),
        embedding_model: model.to_string(),
    }
}
