//! Dense and sparse text vectorization.
//!
//! Providers are batched (`batch_size` texts per call) and re-aligned by
//! stable index. Empty strings are filtered before the provider call and come
//! back as zero-content placeholders so callers keep positional alignment.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::types::EmbeddingError;
use crate::vector::SparseVector;

/// Dense embedding provider.
#[async_trait]
pub trait DenseEmbedder: Send + Sync {
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    fn dimension(&self) -> usize;
}

/// Sparse embedding provider (lexical weights in coordinate form).
#[async_trait]
pub trait SparseEmbedder: Send + Sync {
    async fn embed_sparse(&self, texts: &[String]) -> Result<Vec<SparseVector>, EmbeddingError>;
}

/// A neutral probe vector: every dimension equal, unit norm. Used by the
/// aggregation endpoint to sample an index without a semantic query.
pub fn neutral_vector(dimension: usize) -> Vec<f32> {
    if dimension == 0 {
        return Vec::new();
    }
    let v = 1.0 / (dimension as f32).sqrt();
    vec![v; dimension]
}

/// Embed texts through `embedder`, skipping empty strings and re-aligning the
/// results by stable index. Empty inputs yield empty vectors in place.
pub async fn embed_aligned(
    embedder: &dyn DenseEmbedder,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let non_empty: Vec<(usize, String)> = texts
        .iter()
        .enumerate()
        .filter(|(_, t)| !t.trim().is_empty())
        .map(|(i, t)| (i, t.clone()))
        .collect();

    let mut out = vec![Vec::new(); texts.len()];
    if non_empty.is_empty() {
        return Ok(out);
    }

    let inputs: Vec<String> = non_empty.iter().map(|(_, t)| t.clone()).collect();
    let embedded = embedder.embed(&inputs).await?;
    if embedded.len() != inputs.len() {
        return Err(EmbeddingError::Response(format!(
            "expected {} embeddings, got {}",
            inputs.len(),
            embedded.len()
        )));
    }
    for ((index, _), vector) in non_empty.into_iter().zip(embedded) {
        out[index] = vector;
    }
    Ok(out)
}

// ── OpenAI-compatible dense embedder ──────────────────────────────────

/// Dense embedder for the OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiDenseEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
    batch_size: usize,
}

impl OpenAiDenseEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| EmbeddingError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            dimension: config.dimension,
            batch_size: config.batch_size.max(1),
        })
    }

    async fn embed_one_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let resp = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbeddingError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EmbeddingError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| EmbeddingError::Response(e.to_string()))?;

        if let Some(usage) = json.get("usage") {
            tracing::debug!(
                model = %self.model,
                prompt_tokens = usage.get("prompt_tokens").and_then(serde_json::Value::as_u64),
                "embedding token usage"
            );
        }

        let data = json
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| EmbeddingError::Response("missing 'data' field".to_string()))?;

        // Sort by index so the output order matches the input order.
        let mut indexed: Vec<(usize, Vec<f32>)> = data
            .iter()
            .map(|item| {
                let index = item.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
                let embedding = item
                    .get("embedding")
                    .and_then(Value::as_array)
                    .ok_or_else(|| {
                        EmbeddingError::Response("missing 'embedding' in response item".to_string())
                    })?
                    .iter()
                    .map(|v| {
                        v.as_f64().map(|f| f as f32).ok_or_else(|| {
                            EmbeddingError::Response("invalid float in embedding".to_string())
                        })
                    })
                    .collect::<Result<Vec<f32>, _>>()?;
                Ok((index, embedding))
            })
            .collect::<Result<Vec<_>, EmbeddingError>>()?;
        indexed.sort_by_key(|(i, _)| *i);
        Ok(indexed.into_iter().map(|(_, e)| e).collect())
    }
}

#[async_trait]
impl DenseEmbedder for OpenAiDenseEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            out.extend(self.embed_one_batch(batch).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ── Provider sparse embedder ──────────────────────────────────────────

/// Sparse embedder for the vector provider's inference endpoint.
pub struct ProviderSparseEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl ProviderSparseEmbedder {
    pub fn new(api_key: &str, base_url: &str, model: &str) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EmbeddingError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl SparseEmbedder for ProviderSparseEmbedder {
    async fn embed_sparse(&self, texts: &[String]) -> Result<Vec<SparseVector>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "inputs": texts.iter().map(|t| serde_json::json!({ "text": t })).collect::<Vec<_>>(),
            "parameters": { "input_type": "passage" },
        });

        let resp = self
            .client
            .post(format!("{}/embed", self.base_url))
            .header("Api-Key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbeddingError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EmbeddingError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| EmbeddingError::Response(e.to_string()))?;
        let data = json
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| EmbeddingError::Response("missing 'data' field".to_string()))?;

        data.iter()
            .map(|item| {
                let indices = item
                    .get("sparse_indices")
                    .and_then(Value::as_array)
                    .ok_or_else(|| {
                        EmbeddingError::Response("missing 'sparse_indices'".to_string())
                    })?
                    .iter()
                    .filter_map(Value::as_u64)
                    .map(|v| v as u32)
                    .collect();
                let values = item
                    .get("sparse_values")
                    .and_then(Value::as_array)
                    .ok_or_else(|| EmbeddingError::Response("missing 'sparse_values'".to_string()))?
                    .iter()
                    .filter_map(Value::as_f64)
                    .map(|v| v as f32)
                    .collect();
                Ok(SparseVector { indices, values })
            })
            .collect()
    }
}

// ── Mock embedders ────────────────────────────────────────────────────

/// Deterministic dense embedder for tests and unconfigured environments.
///
/// Hashes character trigrams into the vector so that similar texts land near
/// each other, then normalizes to unit length.
pub struct MockDenseEmbedder {
    dimension: usize,
}

impl MockDenseEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl DenseEmbedder for MockDenseEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; self.dimension];
                let lower = text.to_lowercase();
                let chars: Vec<char> = lower.chars().collect();
                for window in chars.windows(3) {
                    let mut hasher = DefaultHasher::new();
                    window.hash(&mut hasher);
                    let idx = (hasher.finish() as usize) % self.dimension;
                    v[idx] += 1.0;
                }
                let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm > 0.0 {
                    for x in &mut v {
                        *x /= norm;
                    }
                }
                v
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic sparse embedder: whitespace tokens hashed to indices with
/// term-frequency values.
pub struct MockSparseEmbedder;

#[async_trait]
impl SparseEmbedder for MockSparseEmbedder {
    async fn embed_sparse(&self, texts: &[String]) -> Result<Vec<SparseVector>, EmbeddingError> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut counts: std::collections::BTreeMap<u32, f32> = Default::default();
                for token in text.to_lowercase().split_whitespace() {
                    let mut hasher = DefaultHasher::new();
                    token.hash(&mut hasher);
                    let idx = (hasher.finish() % 100_000) as u32;
                    *counts.entry(idx).or_default() += 1.0;
                }
                let (indices, values) = counts.into_iter().unzip();
                SparseVector { indices, values }
            })
            .collect())
    }
}

/// Select a dense embedder: provider-backed when configured, mock otherwise.
pub fn dense_embedder_from_config(
    config: Option<&EmbeddingConfig>,
    fallback_dimension: usize,
) -> Result<Arc<dyn DenseEmbedder>, EmbeddingError> {
    match config {
        Some(c) => {
            tracing::info!(model = %c.model, dimension = c.dimension, "using provider dense embedder");
            Ok(Arc::new(OpenAiDenseEmbedder::new(c)?))
        }
        None => {
            tracing::debug!(
                dimension = fallback_dimension,
                "no embedding provider configured, using mock embedder"
            );
            Ok(Arc::new(MockDenseEmbedder::new(fallback_dimension)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_embeddings_are_deterministic_and_normalized() {
        let embedder = MockDenseEmbedder::new(128);
        let a = embedder.embed(&["hello world".to_string()]).await.unwrap();
        let b = embedder.embed(&["hello world".to_string()]).await.unwrap();
        assert_eq!(a, b);
        let norm: f32 = a[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn embed_aligned_skips_empties_and_keeps_positions() {
        let embedder = MockDenseEmbedder::new(64);
        let texts = vec![
            "first".to_string(),
            "   ".to_string(),
            "third".to_string(),
        ];
        let out = embed_aligned(&embedder, &texts).await.unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].len(), 64);
        assert!(out[1].is_empty());
        assert_eq!(out[2].len(), 64);
    }

    #[tokio::test]
    async fn embed_aligned_all_empty_short_circuits() {
        let embedder = MockDenseEmbedder::new(64);
        let out = embed_aligned(&embedder, &["".to_string(), " ".to_string()])
            .await
            .unwrap();
        assert!(out.iter().all(Vec::is_empty));
    }

    #[tokio::test]
    async fn mock_sparse_counts_terms() {
        let embedder = MockSparseEmbedder;
        let out = embedder
            .embed_sparse(&["urgent urgent invoice".to_string()])
            .await
            .unwrap();
        assert_eq!(out[0].indices.len(), 2);
        assert!(out[0].values.contains(&2.0));
    }

    #[test]
    fn neutral_vector_is_unit_norm() {
        let v = neutral_vector(1536);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.001);
        assert!(neutral_vector(0).is_empty());
    }
}
