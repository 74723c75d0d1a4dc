//! Vector store backends.
//!
//! [`VectorStore`] is the backend-agnostic trait; the runtime selects the
//! concrete implementation at startup. [`PineconeVectorStore`] talks to the
//! provider's HTTP API; [`InMemoryVectorStore`] backs tests and local
//! development with the same semantics (including filter evaluation).

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::config::VectorConfig;
use crate::types::{GrantId, VectorError};

use super::fusion::rrf_fuse;
use super::types::{
    filter, HybridQueryRequest, IndexStats, MatchSource, QueryMatch, QueryRequest, SparseVector,
    VectorRecord,
};

/// Max records per upsert call to the provider.
const UPSERT_BATCH: usize = 100;

/// Backend-agnostic vector store.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Upsert records into a tenant namespace. Stable ids make re-processing
    /// idempotent. Returns the number of records written.
    async fn upsert(
        &self,
        namespace: &GrantId,
        records: Vec<VectorRecord>,
    ) -> Result<usize, VectorError>;

    /// Dense similarity query.
    async fn query(&self, request: QueryRequest) -> Result<Vec<QueryMatch>, VectorError>;

    /// Sparse (lexical) query. Errors when no sparse index is configured.
    async fn query_sparse(
        &self,
        namespace: &GrantId,
        sparse: &SparseVector,
        top_k: usize,
        filter: Option<Value>,
    ) -> Result<Vec<QueryMatch>, VectorError>;

    /// Hybrid retrieval: dense and sparse lists fused by reciprocal rank.
    async fn hybrid_query(
        &self,
        request: HybridQueryRequest,
    ) -> Result<Vec<QueryMatch>, VectorError> {
        let dense = self
            .query(QueryRequest {
                vector: request.dense,
                top_k: request.top_k,
                namespace: request.namespace.clone(),
                filter: request.filter.clone(),
                include_metadata: true,
            })
            .await?;
        let sparse = self
            .query_sparse(
                &request.namespace,
                &request.sparse,
                request.top_k,
                request.filter,
            )
            .await?;
        Ok(rrf_fuse(&dense, &sparse, request.top_k))
    }

    /// Index statistics, optionally scoped to a namespace and filter.
    async fn describe_stats(
        &self,
        namespace: Option<&GrantId>,
        filter: Option<Value>,
    ) -> Result<IndexStats, VectorError>;

    /// Delete everything matching `filter` in a namespace. Returns the number
    /// of records removed (a stats-probe estimate for remote backends).
    async fn delete_by_filter(
        &self,
        namespace: &GrantId,
        filter: Value,
    ) -> Result<u64, VectorError>;

    /// Whether a sparse index exists (enables hybrid retrieval).
    fn supports_sparse(&self) -> bool;
}

// ── Provider-backed implementation ────────────────────────────────────

/// Vector store backed by the provider's serverless index HTTP API.
pub struct PineconeVectorStore {
    client: reqwest::Client,
    api_key: String,
    host: String,
    sparse_enabled: bool,
}

impl PineconeVectorStore {
    pub fn new(config: &VectorConfig) -> Result<Self, VectorError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| VectorError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            host: config.index_host.clone(),
            sparse_enabled: config.sparse_index.is_some(),
        })
    }

    async fn post_json(&self, path: &str, body: Value) -> Result<Value, VectorError> {
        let resp = self
            .client
            .post(format!("{}{path}", self.host))
            .header("Api-Key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VectorError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(VectorError::Http {
                status: status.as_u16(),
                body,
            });
        }
        resp.json::<Value>()
            .await
            .map_err(|e| VectorError::Response(e.to_string()))
    }

    fn parse_matches(value: &Value, source: MatchSource) -> Vec<QueryMatch> {
        value
            .get("matches")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| {
                        Some(QueryMatch {
                            id: m.get("id")?.as_str()?.to_string(),
                            score: m.get("score").and_then(Value::as_f64).unwrap_or(0.0) as f32,
                            source,
                            metadata: m.get("metadata").cloned().unwrap_or(Value::Null),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl VectorStore for PineconeVectorStore {
    async fn upsert(
        &self,
        namespace: &GrantId,
        records: Vec<VectorRecord>,
    ) -> Result<usize, VectorError> {
        let total = records.len();
        for batch in records.chunks(UPSERT_BATCH) {
            let body = json!({
                "vectors": batch,
                "namespace": namespace.namespace(),
            });
            self.post_json("/vectors/upsert", body).await?;
        }
        tracing::debug!(namespace = %namespace, count = total, "upserted vectors");
        Ok(total)
    }

    async fn query(&self, request: QueryRequest) -> Result<Vec<QueryMatch>, VectorError> {
        let mut body = json!({
            "vector": request.vector,
            "topK": request.top_k,
            "namespace": request.namespace.namespace(),
            "includeMetadata": request.include_metadata,
        });
        if let Some(f) = request.filter {
            body["filter"] = f;
        }
        let resp = self.post_json("/query", body).await?;
        Ok(Self::parse_matches(&resp, MatchSource::Dense))
    }

    async fn query_sparse(
        &self,
        namespace: &GrantId,
        sparse: &SparseVector,
        top_k: usize,
        filter: Option<Value>,
    ) -> Result<Vec<QueryMatch>, VectorError> {
        if !self.sparse_enabled {
            return Err(VectorError::Response(
                "no sparse index configured".to_string(),
            ));
        }
        let mut body = json!({
            "sparseVector": { "indices": sparse.indices, "values": sparse.values },
            "topK": top_k,
            "namespace": namespace.namespace(),
            "includeMetadata": true,
        });
        if let Some(f) = filter {
            body["filter"] = f;
        }
        let resp = self.post_json("/query", body).await?;
        Ok(Self::parse_matches(&resp, MatchSource::Sparse))
    }

    async fn describe_stats(
        &self,
        namespace: Option<&GrantId>,
        filter: Option<Value>,
    ) -> Result<IndexStats, VectorError> {
        // Filtered counts are not exact on all provider tiers; callers fall
        // back to a sampling query when exactness is required.
        let exact = filter.is_none();
        let mut body = json!({});
        if let Some(f) = filter {
            body["filter"] = f;
        }
        let resp = self.post_json("/describe_index_stats", body).await?;

        let total = match namespace {
            Some(ns) => resp
                .get("namespaces")
                .and_then(|n| n.get(ns.namespace()))
                .and_then(|n| n.get("vectorCount"))
                .and_then(Value::as_u64)
                .unwrap_or(0),
            None => resp
                .get("totalVectorCount")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        };
        Ok(IndexStats { total, exact })
    }

    async fn delete_by_filter(
        &self,
        namespace: &GrantId,
        filter: Value,
    ) -> Result<u64, VectorError> {
        // Probe the count first so callers can report how many were removed.
        let stats = self
            .describe_stats(Some(namespace), Some(filter.clone()))
            .await
            .unwrap_or_default();
        let body = json!({
            "filter": filter,
            "namespace": namespace.namespace(),
        });
        self.post_json("/vectors/delete", body).await?;
        Ok(stats.total)
    }

    fn supports_sparse(&self) -> bool {
        self.sparse_enabled
    }
}

// ── In-memory implementation ──────────────────────────────────────────

/// In-memory store with the same query/filter semantics as the provider.
#[derive(Default)]
pub struct InMemoryVectorStore {
    namespaces: DashMap<String, HashMap<String, VectorRecord>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return 0.0;
        }
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if na == 0.0 || nb == 0.0 {
            0.0
        } else {
            dot / (na * nb)
        }
    }

    fn matching_records<'a>(
        records: &'a HashMap<String, VectorRecord>,
        filter: Option<&Value>,
    ) -> impl Iterator<Item = &'a VectorRecord> {
        let filter = filter.cloned();
        records.values().filter(move |r| {
            filter
                .as_ref()
                .map(|f| filter::matches(f, &r.metadata))
                .unwrap_or(true)
        })
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(
        &self,
        namespace: &GrantId,
        records: Vec<VectorRecord>,
    ) -> Result<usize, VectorError> {
        let count = records.len();
        let mut ns = self
            .namespaces
            .entry(namespace.namespace().to_string())
            .or_default();
        for record in records {
            ns.insert(record.id.clone(), record);
        }
        Ok(count)
    }

    async fn query(&self, request: QueryRequest) -> Result<Vec<QueryMatch>, VectorError> {
        let Some(ns) = self.namespaces.get(request.namespace.namespace()) else {
            return Ok(Vec::new());
        };
        let mut matches: Vec<QueryMatch> = Self::matching_records(&ns, request.filter.as_ref())
            .filter_map(|r| {
                let values = r.values.as_ref()?;
                Some(QueryMatch {
                    id: r.id.clone(),
                    score: Self::cosine(values, &request.vector),
                    source: MatchSource::Dense,
                    metadata: r.metadata.clone(),
                })
            })
            .collect();
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(request.top_k);
        Ok(matches)
    }

    async fn query_sparse(
        &self,
        namespace: &GrantId,
        sparse: &SparseVector,
        top_k: usize,
        filter: Option<Value>,
    ) -> Result<Vec<QueryMatch>, VectorError> {
        let Some(ns) = self.namespaces.get(namespace.namespace()) else {
            return Ok(Vec::new());
        };
        let mut matches: Vec<QueryMatch> = Self::matching_records(&ns, filter.as_ref())
            .filter_map(|r| {
                let sv = r.sparse_values.as_ref()?;
                let score = sv.dot(sparse);
                (score > 0.0).then(|| QueryMatch {
                    id: r.id.clone(),
                    score,
                    source: MatchSource::Sparse,
                    metadata: r.metadata.clone(),
                })
            })
            .collect();
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn describe_stats(
        &self,
        namespace: Option<&GrantId>,
        filter: Option<Value>,
    ) -> Result<IndexStats, VectorError> {
        let total = match namespace {
            Some(ns) => self
                .namespaces
                .get(ns.namespace())
                .map(|records| Self::matching_records(&records, filter.as_ref()).count() as u64)
                .unwrap_or(0),
            None => self
                .namespaces
                .iter()
                .map(|entry| Self::matching_records(&entry, filter.as_ref()).count() as u64)
                .sum(),
        };
        // In-memory counts are always exact, filtered or not.
        Ok(IndexStats { total, exact: true })
    }

    async fn delete_by_filter(
        &self,
        namespace: &GrantId,
        filter: Value,
    ) -> Result<u64, VectorError> {
        let Some(mut ns) = self.namespaces.get_mut(namespace.namespace()) else {
            return Ok(0);
        };
        let before = ns.len();
        ns.retain(|_, r| !filter::matches(&filter, &r.metadata));
        Ok((before - ns.len()) as u64)
    }

    fn supports_sparse(&self) -> bool {
        true
    }
}
