//! Brute-force in-process index for tests and offline runs.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{DistanceMetric, EntryPayload, IndexEntry, IndexInfo, ScoredEntry, VectorIndex};
use crate::chunker::ChunkId;
use crate::embedder::EmbeddingConfig;
use crate::error::RemoteError;

const SERVICE: &str = "memory-index";

/// Exact nearest-neighbour index held in memory.
#[derive(Debug)]
pub struct InMemoryIndex {
    metric: DistanceMetric,
    state: RwLock<State>,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<ChunkId, Stored>,
    config: Option<EmbeddingConfig>,
    dimension: Option<usize>,
    next_seq: u64,
}

#[derive(Debug)]
struct Stored {
    vector: Vec<f32>,
    payload: EntryPayload,
    seq: u64,
}

impl InMemoryIndex {
    /// Empty index ranking by `metric`.
    pub fn new(metric: DistanceMetric) -> Self {
        Self {
            metric,
            state: RwLock::new(State::default()),
        }
    }

    /// Number of chunk entries.
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    /// True when no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored ids in sorted order.
    pub fn ids(&self) -> Vec<ChunkId> {
        let mut ids: Vec<ChunkId> = self.read().entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new(DistanceMetric::Cosine)
    }
}

fn dimension_mismatch(expected: usize, actual: usize) -> RemoteError {
    RemoteError::Rejected {
        service: SERVICE,
        status: 400,
        body: format!("vector dimension {actual} does not match index dimension {expected}"),
    }
}

impl VectorIndex for InMemoryIndex {
    fn upsert(&self, entries: &[IndexEntry]) -> Result<(), RemoteError> {
        let mut state = self.write();
        let expected = state
            .dimension
            .or_else(|| entries.first().map(|entry| entry.vector.len()));
        if let Some(expected) = expected {
            if let Some(bad) = entries.iter().find(|entry| entry.vector.len() != expected) {
                return Err(dimension_mismatch(expected, bad.vector.len()));
            }
            state.dimension = Some(expected);
        }
        for entry in entries {
            let seq = state.next_seq;
            state.next_seq += 1;
            state.entries.insert(
                entry.id.clone(),
                Stored {
                    vector: entry.vector.clone(),
                    payload: entry.payload.clone(),
                    seq,
                },
            );
        }
        Ok(())
    }

    fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredEntry>, RemoteError> {
        let state = self.read();
        if let Some(expected) = state.dimension {
            if vector.len() != expected {
                return Err(dimension_mismatch(expected, vector.len()));
            }
        }
        let mut hits: Vec<(f32, u64, &ChunkId, &Stored)> = state
            .entries
            .iter()
            .map(|(id, stored)| (self.metric.score(vector, &stored.vector), stored.seq, id, stored))
            .collect();
        // highest score first, newest write wins ties
        hits.sort_by(|a, b| b.0.total_cmp(&a.0).then(b.1.cmp(&a.1)));
        Ok(hits
            .into_iter()
            .take(top_k.min(self.max_top_k()))
            .map(|(score, _, id, stored)| ScoredEntry {
                id: id.clone(),
                score,
                payload: stored.payload.clone(),
            })
            .collect())
    }

    fn delete_paper(&self, paper_id: &str) -> Result<usize, RemoteError> {
        let prefix = ChunkId::paper_prefix(paper_id);
        let mut state = self.write();
        let before = state.entries.len();
        state
            .entries
            .retain(|id, _| !id.as_str().starts_with(&prefix));
        Ok(before - state.entries.len())
    }

    fn info(&self) -> Result<IndexInfo, RemoteError> {
        let state = self.read();
        Ok(IndexInfo {
            vector_count: state.entries.len(),
            dimension: state.dimension,
            metric: Some(self.metric),
        })
    }

    fn load_config(&self) -> Result<Option<EmbeddingConfig>, RemoteError> {
        Ok(self.read().config.clone())
    }

    fn store_config(&self, config: &EmbeddingConfig) -> Result<(), RemoteError> {
        let mut state = self.write();
        if let Some(dimension) = state.dimension {
            if dimension != config.dimension {
                return Err(dimension_mismatch(dimension, config.dimension));
            }
        }
        state.dimension = Some(config.dimension);
        state.config = Some(config.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(paper: &str, ordinal: usize, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            id: ChunkId::new(paper, ordinal),
            vector,
            payload: EntryPayload {
                text: format!("{paper} chunk {ordinal}"),
                paper_id: paper.to_string(),
                ordinal,
                ..EntryPayload::default()
            },
        }
    }

    #[test]
    fn upsert_is_last_write_wins() {
        let index = InMemoryIndex::default();
        index.upsert(&[entry("p", 0, vec![1.0, 0.0])]).unwrap();
        let mut replacement = entry("p", 0, vec![0.0, 1.0]);
        replacement.payload.text = "rewritten".into();
        index.upsert(&[replacement]).unwrap();

        assert_eq!(index.len(), 1);
        let hits = index.query(&[0.0, 1.0], 1).unwrap();
        assert_eq!(hits[0].payload.text, "rewritten");
    }

    #[test]
    fn query_orders_by_score_then_recency() {
        let index = InMemoryIndex::new(DistanceMetric::DotProduct);
        index
            .upsert(&[
                entry("a", 0, vec![1.0, 0.0]),
                entry("b", 0, vec![0.5, 0.5]),
                entry("c", 0, vec![1.0, 0.0]),
            ])
            .unwrap();
        let hits = index.query(&[1.0, 0.0], 10).unwrap();
        let ids: Vec<&str> = hits.iter().map(|hit| hit.id.as_str()).collect();
        assert_eq!(ids, vec!["c#00000", "a#00000", "b#00000"]);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn delete_paper_removes_only_its_chunks() {
        let index = InMemoryIndex::default();
        index
            .upsert(&[
                entry("p1", 0, vec![1.0]),
                entry("p1", 1, vec![1.0]),
                entry("p10", 0, vec![1.0]),
            ])
            .unwrap();
        assert_eq!(index.delete_paper("p1").unwrap(), 2);
        assert_eq!(index.ids(), vec![ChunkId::new("p10", 0)]);
    }

    #[test]
    fn rejects_mismatched_dimensions() {
        let index = InMemoryIndex::default();
        index.upsert(&[entry("p", 0, vec![1.0, 0.0])]).unwrap();
        let err = index.upsert(&[entry("p", 1, vec![1.0])]).unwrap_err();
        assert!(!err.is_retryable());
        assert!(index.query(&[1.0, 0.0, 0.0], 1).is_err());
    }

    #[test]
    fn stores_embedding_config() {
        let index = InMemoryIndex::default();
        assert_eq!(index.load_config().unwrap(), None);
        let config = EmbeddingConfig {
            model: "text-embedding-3-small".into(),
            dimension: 2,
        };
        index.store_config(&config).unwrap();
        assert_eq!(index.load_config().unwrap(), Some(config));
        assert_eq!(index.info().unwrap().dimension, Some(2));
    }
}
