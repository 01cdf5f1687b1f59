//! Upstash Vector REST adapter.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{DistanceMetric, EntryPayload, IndexEntry, IndexInfo, ScoredEntry, VectorIndex};
use crate::chunker::ChunkId;
use crate::embedder::EmbeddingConfig;
use crate::error::{RagError, RagResult, RemoteError};

const SERVICE: &str = "upstash";
/// Namespace holding the embedding provenance record, away from chunk queries.
const CONFIG_NAMESPACE: &str = "paperrag-config";
const CONFIG_ID: &str = "embedding-config";

/// Client for one Upstash Vector index.
#[derive(Clone)]
pub struct UpstashIndex {
    client: Client,
    base: String,
}

impl UpstashIndex {
    /// Builds a client for the index at `url` authenticated with `token`.
    pub fn new(url: &Url, token: &str, timeout: Duration) -> RagResult<Self> {
        if token.trim().is_empty() {
            return Err(RagError::config("missing Upstash Vector REST token"));
        }
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", token.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| RagError::config("invalid Upstash Vector REST token"))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| RagError::config(format!("failed to build Upstash HTTP client: {err}")))?;
        Ok(Self {
            client,
            base: url.as_str().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base, path)
    }

    fn send<R: DeserializeOwned>(&self, request: RequestBuilder) -> Result<R, RemoteError> {
        let resp = request
            .send()
            .map_err(|err| RemoteError::from_reqwest(SERVICE, err))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(RemoteError::from_status(SERVICE, status, body));
        }
        let envelope: Envelope<R> = resp
            .json()
            .map_err(|err| RemoteError::from_reqwest(SERVICE, err))?;
        unwrap_envelope(envelope)
    }

    fn post<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, RemoteError> {
        self.send(self.client.post(self.endpoint(path)).json(body))
    }
}

fn unwrap_envelope<R>(envelope: Envelope<R>) -> Result<R, RemoteError> {
    match envelope {
        Envelope {
            result: Some(result),
            ..
        } => Ok(result),
        Envelope {
            error: Some(error), ..
        } => Err(RemoteError::protocol(SERVICE, error)),
        _ => Err(RemoteError::protocol(SERVICE, "response carried no result")),
    }
}

impl VectorIndex for UpstashIndex {
    fn upsert(&self, entries: &[IndexEntry]) -> Result<(), RemoteError> {
        if entries.is_empty() {
            return Ok(());
        }
        let body: Vec<UpsertVector<'_, &EntryPayload>> = entries
            .iter()
            .map(|entry| UpsertVector {
                id: entry.id.as_str(),
                vector: &entry.vector,
                metadata: &entry.payload,
            })
            .collect();
        let _: String = self.post("upsert", &body)?;
        debug!(count = entries.len(), "upserted vectors");
        Ok(())
    }

    fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredEntry>, RemoteError> {
        let request = QueryRequest {
            vector,
            top_k: top_k.min(self.max_top_k()),
            include_metadata: true,
        };
        let hits: Vec<QueryHit> = self.post("query", &request)?;
        hits.into_iter()
            .map(|hit| {
                let payload = hit.metadata.ok_or_else(|| {
                    RemoteError::protocol(SERVICE, format!("hit {} has no metadata", hit.id))
                })?;
                let payload: EntryPayload = serde_json::from_value(payload).map_err(|err| {
                    RemoteError::protocol(SERVICE, format!("hit {} metadata: {err}", hit.id))
                })?;
                Ok(ScoredEntry {
                    id: ChunkId::from(hit.id),
                    score: hit.score,
                    payload,
                })
            })
            .collect()
    }

    fn delete_paper(&self, paper_id: &str) -> Result<usize, RemoteError> {
        let prefix = ChunkId::paper_prefix(paper_id);
        let deleted: DeleteResult = self.post("delete", &DeleteRequest { prefix: &prefix })?;
        Ok(deleted.deleted)
    }

    fn info(&self) -> Result<IndexInfo, RemoteError> {
        let info: InfoResult = self.send(self.client.get(self.endpoint("info")))?;
        // the config record lives in its own namespace; count only the default one
        let vector_count = info
            .namespaces
            .get("")
            .map(|ns| ns.vector_count)
            .unwrap_or(info.vector_count);
        Ok(IndexInfo {
            vector_count,
            dimension: (info.dimension > 0).then_some(info.dimension),
            metric: info.similarity_function,
        })
    }

    fn load_config(&self) -> Result<Option<EmbeddingConfig>, RemoteError> {
        let request = FetchRequest {
            ids: [CONFIG_ID],
            include_metadata: true,
        };
        let records: Vec<Option<FetchedRecord>> =
            self.post(&format!("fetch/{CONFIG_NAMESPACE}"), &request)?;
        records
            .into_iter()
            .flatten()
            .find_map(|record| record.metadata)
            .map(|metadata| {
                serde_json::from_value(metadata).map_err(|err| {
                    RemoteError::protocol(SERVICE, format!("embedding config record: {err}"))
                })
            })
            .transpose()
    }

    fn store_config(&self, config: &EmbeddingConfig) -> Result<(), RemoteError> {
        if config.dimension == 0 {
            return Err(RemoteError::protocol(SERVICE, "embedding dimension is zero"));
        }
        // all-zero vectors are rejected under cosine, so store a unit vector
        let mut vector = vec![0.0f32; config.dimension];
        vector[0] = 1.0;
        let body = [UpsertVector {
            id: CONFIG_ID,
            vector: &vector,
            metadata: config,
        }];
        let _: String = self.post(&format!("upsert/{CONFIG_NAMESPACE}"), &body)?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct Envelope<R> {
    result: Option<R>,
    error: Option<String>,
}

#[derive(Serialize)]
struct UpsertVector<'a, M> {
    id: &'a str,
    vector: &'a [f32],
    metadata: M,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
}

#[derive(Debug, Deserialize)]
struct QueryHit {
    id: String,
    score: f32,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct DeleteRequest<'a> {
    prefix: &'a str,
}

#[derive(Debug, Deserialize)]
struct DeleteResult {
    deleted: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FetchRequest<'a> {
    ids: [&'a str; 1],
    include_metadata: bool,
}

#[derive(Debug, Deserialize)]
struct FetchedRecord {
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InfoResult {
    #[serde(default)]
    vector_count: usize,
    #[serde(default)]
    dimension: usize,
    #[serde(default)]
    similarity_function: Option<DistanceMetric>,
    #[serde(default)]
    namespaces: HashMap<String, NamespaceInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamespaceInfo {
    #[serde(default)]
    vector_count: usize,
}
