mod common;

use std::sync::Arc;

use paperrag::index::{EntryPayload, IndexEntry};
use paperrag::synth::NO_CONTEXT_ANSWER;
use paperrag::{
    AnswerSynthesizer, ChunkConfig, ChunkId, Grounding, IndexingPipeline, PaperState,
    PipelineOptions, RagError, RetryPolicy, Retriever, SynthesisOptions, VectorIndex,
};
use pretty_assertions::assert_eq;

use common::{client, corpus, paper, CountingIndex, FakeLlm, DIMENSIONS, MODEL};

fn options(chunk_size: usize, chunk_overlap: usize) -> PipelineOptions {
    PipelineOptions {
        chunking: ChunkConfig {
            chunk_size,
            chunk_overlap,
        },
        retry: RetryPolicy::no_retry(),
        ..PipelineOptions::default()
    }
}

fn index_corpus(index: &Arc<CountingIndex>) {
    let pipeline = IndexingPipeline::new(client(MODEL), Arc::clone(index), options(50, 0)).unwrap();
    let report = pipeline.run(&corpus()).unwrap();
    assert!(report.is_success(), "unexpected failures: {:?}", report.failures);
}

#[test]
fn attention_question_retrieves_attention_paper() {
    common::init_tracing();
    let index = Arc::new(CountingIndex::default());
    index_corpus(&index);

    let retriever = Retriever::new(client(MODEL), Arc::clone(&index), RetryPolicy::no_retry());
    let top = retriever.retrieve("What is attention?", 1).unwrap();
    assert_eq!(top.chunks.len(), 1);
    assert_eq!(top.chunks[0].paper_id, "attention");
    assert_eq!(top.chunks[0].title, "Attention Is All You Need");
    assert!(top.chunks[0].text.chars().count() <= 50);

    let several = retriever.retrieve("What is attention?", 5).unwrap();
    assert_eq!(several.chunks.len(), 5);
    assert!(several
        .chunks
        .windows(2)
        .all(|pair| pair[0].score >= pair[1].score));

    let synth = AnswerSynthesizer::new(
        FakeLlm::new("Attention weighs input tokens [attention]."),
        SynthesisOptions::default(),
        RetryPolicy::no_retry(),
    );
    let answer = synth.synthesize("What is attention?", &top).unwrap();
    assert_eq!(answer.grounding, Grounding::Grounded);
    assert_eq!(answer.sources[0].paper_id, "attention");
    let prompts = synth.provider().prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("[attention]"));
}

#[test]
fn reindexing_a_paper_keeps_index_size() {
    let index = Arc::new(CountingIndex::default());
    index_corpus(&index);
    let before = index.len();
    assert!(before > 0);

    let pipeline = IndexingPipeline::new(client(MODEL), Arc::clone(&index), options(50, 0)).unwrap();
    let again = pipeline.run(&corpus()[..1]).unwrap();
    assert_eq!(again.papers_indexed, 1);
    assert_eq!(index.len(), before);
}

#[test]
fn malformed_paper_is_isolated() {
    let mut papers = corpus();
    papers[1] = paper("broken", "Garbled Extraction", "text with a \u{0} byte in it");

    let index = Arc::new(CountingIndex::default());
    let pipeline = IndexingPipeline::new(client(MODEL), Arc::clone(&index), options(50, 0)).unwrap();
    let report = pipeline.run(&papers).unwrap();

    assert_eq!(report.papers_processed, 3);
    assert_eq!(report.papers_failed, 1);
    assert_eq!(report.papers_indexed, 2);
    assert!(matches!(report.papers[1].state, PaperState::Failed(_)));
    assert_eq!(report.failures[0].paper_id, "broken");
    assert!(matches!(
        report.into_result(),
        Err(RagError::PartialIndexing {
            failed_papers: 1,
            ..
        })
    ));
}

#[test]
fn empty_index_still_answers() {
    let index = Arc::new(CountingIndex::default());
    let retriever = Retriever::new(client(MODEL), Arc::clone(&index), RetryPolicy::no_retry());
    let synth = AnswerSynthesizer::new(
        FakeLlm::new("unused"),
        SynthesisOptions::default(),
        RetryPolicy::no_retry(),
    );

    let retrieval = retriever.retrieve("What is attention?", 4);
    let answer = synth.answer("What is attention?", retrieval).unwrap();
    assert_eq!(answer.grounding, Grounding::NoContext);
    assert_eq!(answer.text, NO_CONTEXT_ANSWER);
    assert!(synth.provider().prompts().is_empty());
    assert_eq!(index.queries(), 0);
}

#[test]
fn model_mismatch_is_caught_before_querying() {
    let index = Arc::new(CountingIndex::default());
    index_corpus(&index);

    let retriever = Retriever::new(
        client("hashing-v2"),
        Arc::clone(&index),
        RetryPolicy::no_retry(),
    );
    let err = retriever.retrieve("What is attention?", 4).unwrap_err();
    assert!(matches!(err, RagError::Configuration(_)));
    assert_eq!(index.queries(), 0);
}

#[test]
fn indexing_with_another_model_is_refused() {
    let index = Arc::new(CountingIndex::default());
    index_corpus(&index);
    let before = index.len();

    let pipeline =
        IndexingPipeline::new(client("hashing-v2"), Arc::clone(&index), options(50, 0)).unwrap();
    let err = pipeline.run(&corpus()).unwrap_err();
    assert!(matches!(err, RagError::Configuration(_)));
    assert_eq!(index.len(), before);
}

#[test]
fn entries_without_stored_model_are_not_treated_as_empty() {
    let index = Arc::new(CountingIndex::default());
    let mut vector = vec![0.0; DIMENSIONS];
    vector[0] = 1.0;
    index
        .upsert(&[IndexEntry {
            id: ChunkId::new("legacy", 0),
            vector,
            payload: EntryPayload {
                text: "Attention from an older ingest.".into(),
                paper_id: "legacy".into(),
                title: "Legacy Paper".into(),
                ..EntryPayload::default()
            },
        }])
        .unwrap();

    let retriever = Retriever::new(client(MODEL), Arc::clone(&index), RetryPolicy::no_retry());
    let err = retriever.retrieve("What is attention?", 4).unwrap_err();
    assert!(matches!(err, RagError::Configuration(_)));
    assert_eq!(index.queries(), 0);

    let pipeline = IndexingPipeline::new(client(MODEL), Arc::clone(&index), options(50, 0)).unwrap();
    let err = pipeline.run(&corpus()).unwrap_err();
    assert!(matches!(err, RagError::Configuration(_)));
    assert_eq!(index.len(), 1);
}
