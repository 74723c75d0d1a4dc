//! Retrieval surface: filtered semantic search, group-by aggregation, exact
//! and sampled counts, and compact analysis summaries.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::embedding::{embed_aligned, neutral_vector, DenseEmbedder, SparseEmbedder};
use crate::summarizer::Summarizer;
use crate::types::{GrantId, RuntimeError};
use crate::vector::{
    filter, HybridQueryRequest, MatchSource, QueryMatch, QueryRequest, VectorStore,
};

/// Hard cap on `topK` for search and count sampling.
pub const SEARCH_TOP_K_CAP: usize = 10_000;

/// Hard cap on the aggregation sample size.
pub const AGGREGATE_SAMPLE_CAP: usize = 1_000;

/// One normalized search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultItem {
    #[serde(rename = "type")]
    pub record_type: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub title: String,
    pub snippet: String,
    pub from: String,
    #[serde(default)]
    pub to: Vec<String>,
    pub date: i64,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<MatchSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub results: Vec<SearchResultItem>,
    pub total: usize,
}

/// One aggregation group: the grouping key as an object plus its count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateGroup {
    pub key: Map<String, Value>,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateOutcome {
    pub total: u64,
    pub groups: Vec<AggregateGroup>,
}

/// Compact analysis summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub bullets: Vec<String>,
    pub paragraph: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeOutcome {
    pub summary: AnalysisSummary,
    pub count: usize,
}

/// Retrieval engine over one vector index.
pub struct RetrievalEngine {
    dense: Arc<dyn DenseEmbedder>,
    sparse: Option<Arc<dyn SparseEmbedder>>,
    vectors: Arc<dyn VectorStore>,
    summarizer: Option<Arc<Summarizer>>,
}

impl RetrievalEngine {
    pub fn new(
        dense: Arc<dyn DenseEmbedder>,
        sparse: Option<Arc<dyn SparseEmbedder>>,
        vectors: Arc<dyn VectorStore>,
        summarizer: Option<Arc<Summarizer>>,
    ) -> Self {
        Self {
            dense,
            sparse,
            vectors,
            summarizer,
        }
    }

    /// Message-scoped queries filter `type=message` unless the caller set a
    /// `type` clause; unknown type values pass through verbatim.
    fn effective_filter(filters: Option<Value>) -> Value {
        let has_type = filters
            .as_ref()
            .and_then(Value::as_object)
            .map(|m| m.contains_key("type"))
            .unwrap_or(false);
        if has_type {
            filters.unwrap_or_else(|| Value::Object(Map::new()))
        } else {
            filter::with(filters, "type", filter::eq("message"))
        }
    }

    fn item_from_match(m: QueryMatch, include_source: bool) -> SearchResultItem {
        let meta = &m.metadata;
        let get_str =
            |key: &str| meta.get(key).and_then(Value::as_str).unwrap_or("").to_string();
        SearchResultItem {
            record_type: get_str("type"),
            id: m.id.clone(),
            thread_id: meta
                .get("thread_id")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            title: get_str("subject"),
            snippet: get_str("snippet"),
            from: get_str("from"),
            to: meta
                .get("to")
                .and_then(Value::as_array)
                .map(|arr| {
                    arr.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            date: meta.get("date").and_then(Value::as_i64).unwrap_or(0),
            score: m.score,
            source: include_source.then_some(m.source),
        }
    }

    /// Filtered semantic search. Uses hybrid retrieval when a sparse index
    /// pair exists; `source` is populated per match in that case.
    pub async fn search(
        &self,
        namespace: &GrantId,
        query: &str,
        top_k: usize,
        filters: Option<Value>,
    ) -> Result<SearchOutcome, RuntimeError> {
        let top_k = top_k.min(SEARCH_TOP_K_CAP);
        if top_k == 0 {
            return Ok(SearchOutcome {
                results: Vec::new(),
                total: 0,
            });
        }
        let filter = Self::effective_filter(filters);

        let dense = embed_aligned(self.dense.as_ref(), &[query.to_string()])
            .await?
            .remove(0);
        if dense.is_empty() {
            return Ok(SearchOutcome {
                results: Vec::new(),
                total: 0,
            });
        }

        let hybrid = self.sparse.is_some() && self.vectors.supports_sparse();
        let matches = if hybrid {
            let sparse = self
                .sparse
                .as_ref()
                .expect("sparse checked above")
                .embed_sparse(&[query.to_string()])
                .await?
                .remove(0);
            self.vectors
                .hybrid_query(HybridQueryRequest {
                    dense,
                    sparse,
                    top_k,
                    namespace: namespace.clone(),
                    filter: Some(filter),
                })
                .await?
        } else {
            self.vectors
                .query(QueryRequest {
                    vector: dense,
                    top_k,
                    namespace: namespace.clone(),
                    filter: Some(filter),
                    include_metadata: true,
                })
                .await?
        };

        let total = matches.len();
        Ok(SearchOutcome {
            results: matches
                .into_iter()
                .map(|m| Self::item_from_match(m, hybrid))
                .collect(),
            total,
        })
    }

    /// Group-by aggregation over a neutral-probe sample of the filtered set.
    /// `from_domain` is synthesized from `from` when absent in metadata.
    pub async fn aggregate(
        &self,
        namespace: &GrantId,
        group_by: &[String],
        filters: Option<Value>,
        top_k: usize,
    ) -> Result<AggregateOutcome, RuntimeError> {
        let sample = top_k.clamp(1, AGGREGATE_SAMPLE_CAP);
        let filter = Self::effective_filter(filters);

        let matches = self
            .vectors
            .query(QueryRequest {
                vector: neutral_vector(self.dense.dimension()),
                top_k: sample,
                namespace: namespace.clone(),
                filter: Some(filter),
                include_metadata: true,
            })
            .await?;
        let total = matches.len() as u64;

        if group_by.is_empty() {
            return Ok(AggregateOutcome {
                total,
                groups: Vec::new(),
            });
        }

        let mut counts: std::collections::BTreeMap<String, (Map<String, Value>, u64)> =
            Default::default();
        for m in &matches {
            let mut key = Map::new();
            let mut complete = true;
            for field in group_by {
                let value = match m.metadata.get(field.as_str()) {
                    Some(v) if !v.is_null() => v.clone(),
                    _ if field == "from_domain" => {
                        match m
                            .metadata
                            .get("from")
                            .and_then(Value::as_str)
                            .and_then(crate::mail::text::from_domain)
                        {
                            Some(domain) => Value::String(domain),
                            None => {
                                complete = false;
                                break;
                            }
                        }
                    }
                    _ => {
                        complete = false;
                        break;
                    }
                };
                key.insert(field.clone(), value);
            }
            if !complete {
                continue;
            }
            let map_key = serde_json::to_string(&key).unwrap_or_default();
            counts
                .entry(map_key)
                .and_modify(|(_, c)| *c += 1)
                .or_insert((key, 1));
        }

        let mut groups: Vec<AggregateGroup> = counts
            .into_values()
            .map(|(key, count)| AggregateGroup { key, count })
            .collect();
        groups.sort_by(|a, b| b.count.cmp(&a.count));

        Ok(AggregateOutcome { total, groups })
    }

    /// Exact count where the backend can answer exactly; otherwise a single
    /// `topK=10,000` sampling query.
    pub async fn count(
        &self,
        namespace: &GrantId,
        filters: Option<Value>,
    ) -> Result<u64, RuntimeError> {
        let filter = filters.filter(|f| f.as_object().map(|m| !m.is_empty()).unwrap_or(false));

        let stats = self
            .vectors
            .describe_stats(Some(namespace), filter.clone())
            .await?;
        if stats.exact {
            return Ok(stats.total);
        }

        let matches = self
            .vectors
            .query(QueryRequest {
                vector: neutral_vector(self.dense.dimension()),
                top_k: SEARCH_TOP_K_CAP,
                namespace: namespace.clone(),
                filter,
                include_metadata: false,
            })
            .await?;
        Ok(matches.len() as u64)
    }

    /// Retrieve top results for `text` and emit a compact summary.
    pub async fn analyze(
        &self,
        namespace: &GrantId,
        text: &str,
        filters: Option<Value>,
        top_k: usize,
    ) -> Result<AnalyzeOutcome, RuntimeError> {
        let outcome = self
            .search(namespace, text, top_k.clamp(1, 50), filters)
            .await?;
        let count = outcome.total;

        let summary = match &self.summarizer {
            Some(summarizer) if !outcome.results.is_empty() => {
                let listing: Vec<String> = outcome
                    .results
                    .iter()
                    .map(|r| format!("- {} (from {}): {}", r.title, r.from, r.snippet))
                    .collect();
                match summarizer.rollup_texts(&listing).await {
                    Ok((paragraph, _)) => AnalysisSummary {
                        bullets: self.bullets_from(&outcome),
                        paragraph,
                        tags: Self::tags_from(&outcome),
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "analysis summary degraded to extractive");
                        Self::extractive_summary(&outcome)
                    }
                }
            }
            _ => Self::extractive_summary(&outcome),
        };

        Ok(AnalyzeOutcome { summary, count })
    }

    fn bullets_from(&self, outcome: &SearchOutcome) -> Vec<String> {
        outcome
            .results
            .iter()
            .take(5)
            .map(|r| format!("{} — {}", r.title, r.from))
            .collect()
    }

    fn tags_from(outcome: &SearchOutcome) -> Vec<String> {
        let mut tags: Vec<String> = outcome
            .results
            .iter()
            .filter_map(|r| crate::mail::text::from_domain(&r.from))
            .collect();
        tags.sort();
        tags.dedup();
        tags.truncate(5);
        tags
    }

    fn extractive_summary(outcome: &SearchOutcome) -> AnalysisSummary {
        let bullets: Vec<String> = outcome
            .results
            .iter()
            .take(5)
            .map(|r| format!("{} — {}", r.title, r.from))
            .collect();
        let paragraph = if bullets.is_empty() {
            "No matching messages.".to_string()
        } else {
            format!(
                "{} matching messages; most relevant: {}.",
                outcome.total,
                outcome
                    .results
                    .iter()
                    .take(3)
                    .map(|r| r.title.as_str())
                    .collect::<Vec<_>>()
                    .join("; ")
            )
        };
        AnalysisSummary {
            bullets,
            paragraph,
            tags: Self::tags_from(outcome),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{MockDenseEmbedder, MockSparseEmbedder};
    use crate::vector::{InMemoryVectorStore, RecordMetadata, RecordType, VectorRecord};

    async fn seeded_engine() -> (RetrievalEngine, GrantId) {
        let grant = GrantId::new("g1");
        let dense = Arc::new(MockDenseEmbedder::new(64));
        let store = Arc::new(InMemoryVectorStore::new());

        let mut records = Vec::new();
        let seed = [
            ("m1#0", "Security alert", "no-reply@accounts.google.com", true, RecordType::Message),
            ("m2#0", "Weekly digest", "news@streamlit.discoursemail.com", true, RecordType::Message),
            ("m3#0", "Connection request", "invitations@linkedin.com", true, RecordType::Message),
            ("thread_week:t1:2025-W43", "Week rollup", "", false, RecordType::ThreadWeek),
        ];
        for (id, subject, from, unread, rt) in seed {
            let vector = dense
                .embed(&[subject.to_string()])
                .await
                .unwrap()
                .remove(0);
            let meta = RecordMetadata {
                record_type: rt,
                grant_id: "g1".into(),
                email_id: id.split('#').next().unwrap().into(),
                thread_id: "t1".into(),
                subject: subject.into(),
                from: from.into(),
                from_domain: crate::mail::text::from_domain(from).unwrap_or_default(),
                to: vec![],
                date: 1_700_000_000,
                date_created: "2023-11-14T22:13:20Z".into(),
                snippet: format!("snippet for {subject}"),
                has_attachments: false,
                unread,
                bucket: matches!(rt, RecordType::ThreadWeek).then(|| "2025-W43".to_string()),
            };
            records.push(VectorRecord {
                id: id.to_string(),
                values: Some(vector),
                sparse_values: None,
                metadata: meta.to_value(),
            });
        }
        store.upsert(&grant, records).await.unwrap();

        let engine = RetrievalEngine::new(dense, None, store, None);
        (engine, grant)
    }

    #[tokio::test]
    async fn search_defaults_to_message_type() {
        let (engine, grant) = seeded_engine().await;
        let outcome = engine
            .search(&grant, "security alert", 10, None)
            .await
            .unwrap();
        assert!(outcome.total >= 1);
        assert!(outcome
            .results
            .iter()
            .all(|r| r.record_type == "message"));
        assert_eq!(outcome.results[0].title, "Security alert");
        assert!(outcome.results[0].from.ends_with("@accounts.google.com"));
    }

    #[tokio::test]
    async fn explicit_type_filter_overrides_default() {
        let (engine, grant) = seeded_engine().await;
        let outcome = engine
            .search(
                &grant,
                "rollup",
                10,
                Some(serde_json::json!({ "type": { "$eq": "thread_week" } })),
            )
            .await
            .unwrap();
        assert_eq!(outcome.total, 1);
        assert_eq!(outcome.results[0].record_type, "thread_week");
    }

    #[tokio::test]
    async fn top_k_zero_is_empty() {
        let (engine, grant) = seeded_engine().await;
        let outcome = engine.search(&grant, "anything", 0, None).await.unwrap();
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.total, 0);
    }

    #[tokio::test]
    async fn aggregate_groups_by_from_domain() {
        let (engine, grant) = seeded_engine().await;
        let outcome = engine
            .aggregate(
                &grant,
                &["from_domain".to_string()],
                Some(serde_json::json!({ "unread": { "$eq": true } })),
                100,
            )
            .await
            .unwrap();
        assert_eq!(outcome.total, 3);
        let counted: u64 = outcome.groups.iter().map(|g| g.count).sum();
        assert!(counted <= outcome.total);
        assert!(outcome.groups.iter().any(|g| {
            g.key.get("from_domain").and_then(Value::as_str) == Some("linkedin.com")
                && g.count == 1
        }));
    }

    #[tokio::test]
    async fn count_uses_exact_stats_for_in_memory() {
        let (engine, grant) = seeded_engine().await;
        let count = engine
            .count(&grant, Some(serde_json::json!({ "type": { "$eq": "message" } })))
            .await
            .unwrap();
        assert_eq!(count, 3);
        let all = engine.count(&grant, None).await.unwrap();
        assert_eq!(all, 4);
    }

    #[tokio::test]
    async fn analyze_without_model_is_extractive() {
        let (engine, grant) = seeded_engine().await;
        let outcome = engine
            .analyze(&grant, "security", None, 10)
            .await
            .unwrap();
        assert!(outcome.count >= 1);
        assert!(!outcome.summary.bullets.is_empty());
        assert!(!outcome.summary.paragraph.is_empty());
    }

    #[tokio::test]
    async fn hybrid_search_reports_source() {
        let grant = GrantId::new("g1");
        let dense = Arc::new(MockDenseEmbedder::new(64));
        let sparse = Arc::new(MockSparseEmbedder);
        let store = Arc::new(InMemoryVectorStore::new());

        let body = "quarterly invoice attached".to_string();
        let vector = dense.embed(&[body.clone()]).await.unwrap().remove(0);
        let sv = sparse.embed_sparse(&[body.clone()]).await.unwrap().remove(0);
        let meta = RecordMetadata {
            record_type: RecordType::Message,
            grant_id: "g1".into(),
            email_id: "m1".into(),
            thread_id: "t1".into(),
            subject: "Invoice".into(),
            from: "billing@vendor.com".into(),
            from_domain: "vendor.com".into(),
            to: vec![],
            date: 1_700_000_000,
            date_created: "2023-11-14T22:13:20Z".into(),
            snippet: body.clone(),
            has_attachments: true,
            unread: false,
            bucket: None,
        };
        store
            .upsert(
                &grant,
                vec![VectorRecord {
                    id: "m1#0".into(),
                    values: Some(vector),
                    sparse_values: Some(sv),
                    metadata: meta.to_value(),
                }],
            )
            .await
            .unwrap();

        let engine = RetrievalEngine::new(dense, Some(sparse), store, None);
        let outcome = engine
            .search(&grant, "quarterly invoice attached", 5, None)
            .await
            .unwrap();
        assert_eq!(outcome.total, 1);
        assert!(outcome.results[0].source.is_some());
    }
}
