//! Two-stage map-reduce over a set of source texts.
//!
//! Map chunks the input into fixed-size groups and asks the model for a
//! strict-JSON candidate list per chunk. Chunk failures are recorded and do
//! not abort the reduce stage. Reduce receives the deduplicated, ranked,
//! capped union of candidates and emits the final rollup.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::config::TriageConfig;
use crate::types::SummarizerError;

use super::model::{extract_json, ChatModel, ChatRequest};

/// One input item for the map stage.
#[derive(Debug, Clone)]
pub struct SourceItem {
    pub id: String,
    pub text: String,
}

/// A priority candidate produced by a map chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub priority_level: String,
    /// Model confidence in `[0, 1]`; clamped on ingest.
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub signals: Vec<String>,
}

/// Bookkeeping attached to every rollup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Validation {
    /// Candidates that entered the reduce stage (after dedupe + cap).
    pub total: usize,
    pub chunks_considered: usize,
    pub map_failures: usize,
    #[serde(default)]
    pub notes: Vec<String>,
}

/// Final triage rollup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageOutcome {
    pub top_three: Vec<Candidate>,
    pub backup_candidates: Vec<Candidate>,
    pub validation: Validation,
}

const MAP_SYSTEM: &str = "You are an email triage assistant. Given a numbered \
list of emails, identify the ones that need the user's attention. Respond with \
strict JSON: {\"candidates\": [{\"message_id\": string, \"priority_level\": \
\"critical\"|\"high\"|\"medium\"|\"low\", \"confidence\": number 0..1, \
\"reason\": string, \"signals\": [string]}]}. Only include emails that are \
plausibly actionable or time-sensitive.";

const REDUCE_SYSTEM: &str = "You are ranking pre-screened email candidates. \
Given a JSON list of candidates (already deduplicated and ranked by \
confidence), choose the three most urgent and keep the rest as backups. \
Respond with strict JSON: {\"top_three\": [candidate], \"backup_candidates\": \
[candidate]} reusing the candidate objects verbatim.";

const ROLLUP_MAP_SYSTEM: &str = "You summarize batches of related emails. \
Respond with strict JSON: {\"summary\": string} capturing senders, asks, \
decisions, and dates in at most four sentences.";

const ROLLUP_REDUCE_SYSTEM: &str = "You combine partial summaries of an email \
thread or time window into one coherent rollup. Respond with strict JSON: \
{\"summary\": string} of at most five sentences.";

/// Map-reduce engine bound to a model and triage parameters.
pub struct MapReduceEngine<'a> {
    model: &'a dyn ChatModel,
    model_name: &'a str,
    config: &'a TriageConfig,
}

impl<'a> MapReduceEngine<'a> {
    pub fn new(model: &'a dyn ChatModel, model_name: &'a str, config: &'a TriageConfig) -> Self {
        Self {
            model,
            model_name,
            config,
        }
    }

    fn hint_block(&self) -> String {
        let mut out = String::new();
        if !self.config.hint_senders.is_empty() {
            out.push_str(&format!(
                "\nTreat mail from these senders as elevated: {}.",
                self.config.hint_senders.join(", ")
            ));
        }
        if !self.config.hint_domains.is_empty() {
            out.push_str(&format!(
                "\nTreat mail from these domains as elevated: {}.",
                self.config.hint_domains.join(", ")
            ));
        }
        if !self.config.hint_keywords.is_empty() {
            out.push_str(&format!(
                "\nThese keywords signal urgency: {}.",
                self.config.hint_keywords.join(", ")
            ));
        }
        out
    }

    /// Priority triage over `items`. Map failures are recorded per chunk and
    /// surviving candidates still flow into reduce.
    pub async fn triage(&self, items: &[SourceItem]) -> Result<TriageOutcome, SummarizerError> {
        let chunks: Vec<&[SourceItem]> = items.chunks(self.config.map_chunk).collect();
        let chunk_count = chunks.len();
        let mut candidates: Vec<Candidate> = Vec::new();
        let mut map_failures = 0usize;
        let mut notes: Vec<String> = Vec::new();

        let system = format!("{MAP_SYSTEM}{}", self.hint_block());
        for (index, chunk) in chunks.into_iter().enumerate() {
            match self.map_chunk(&system, chunk).await {
                Ok(mut found) => candidates.append(&mut found),
                Err(e) => {
                    map_failures += 1;
                    notes.push(format!("map chunk {index} failed: {e}"));
                    tracing::warn!(chunk = index, error = %e, "triage map chunk failed");
                }
            }
        }
        if chunk_count > 0 && map_failures == chunk_count {
            return Err(SummarizerError::AllChunksFailed(chunk_count));
        }

        let ranked = dedupe_and_rank(candidates, self.config.max_candidates);
        let total = ranked.len();

        let (top_three, backup_candidates, mut reduce_notes) = self.reduce(&ranked).await;
        notes.append(&mut reduce_notes);

        Ok(TriageOutcome {
            top_three,
            backup_candidates,
            validation: Validation {
                total,
                chunks_considered: chunk_count - map_failures,
                map_failures,
                notes,
            },
        })
    }

    async fn map_chunk(
        &self,
        system: &str,
        chunk: &[SourceItem],
    ) -> Result<Vec<Candidate>, SummarizerError> {
        let listing = chunk
            .iter()
            .enumerate()
            .map(|(i, item)| format!("[{}] id={}\n{}", i + 1, item.id, item.text))
            .collect::<Vec<_>>()
            .join("\n\n");

        let request = ChatRequest::json(self.model_name, system, &listing);
        let raw = self.model.complete(&request).await?;
        let json = extract_json(&raw)?;
        let list = json
            .get("candidates")
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        let mut candidates: Vec<Candidate> = serde_json::from_value(list)
            .map_err(|e| SummarizerError::Parse(format!("candidate list: {e}")))?;
        for c in &mut candidates {
            c.confidence = c.confidence.clamp(0.0, 1.0);
        }
        Ok(candidates)
    }

    /// Reduce via the model; degrade to the deterministic ranking when the
    /// model output cannot be parsed.
    async fn reduce(&self, ranked: &[Candidate]) -> (Vec<Candidate>, Vec<Candidate>, Vec<String>) {
        if ranked.is_empty() {
            return (Vec::new(), Vec::new(), Vec::new());
        }
        let payload = serde_json::to_string(&ranked).unwrap_or_else(|_| "[]".to_string());
        let request = ChatRequest::json(self.model_name, REDUCE_SYSTEM, &payload);

        match self.model.complete(&request).await.and_then(|raw| {
            let json = extract_json(&raw)?;
            let top: Vec<Candidate> = serde_json::from_value(
                json.get("top_three").cloned().unwrap_or_default(),
            )
            .map_err(|e| SummarizerError::Parse(format!("top_three: {e}")))?;
            let backup: Vec<Candidate> = serde_json::from_value(
                json.get("backup_candidates").cloned().unwrap_or_default(),
            )
            .unwrap_or_default();
            Ok((top, backup))
        }) {
            Ok((top, backup)) if !top.is_empty() => {
                (top.into_iter().take(3).collect(), backup, Vec::new())
            }
            Ok(_) | Err(_) => {
                let top: Vec<Candidate> = ranked.iter().take(3).cloned().collect();
                let backup: Vec<Candidate> = ranked.iter().skip(3).cloned().collect();
                (
                    top,
                    backup,
                    vec!["reduce degraded to deterministic ranking".to_string()],
                )
            }
        }
    }

    /// Hierarchical rollup over raw source texts: per-chunk summaries mapped,
    /// then combined. Returns the final rollup text plus validation.
    pub async fn rollup(
        &self,
        texts: &[String],
    ) -> Result<(String, Validation), SummarizerError> {
        let chunks: Vec<&[String]> = texts.chunks(self.config.map_chunk).collect();
        let chunk_count = chunks.len();
        let mut partials: Vec<String> = Vec::new();
        let mut map_failures = 0usize;
        let mut notes = Vec::new();

        for (index, chunk) in chunks.into_iter().enumerate() {
            let joined = chunk.join("\n\n---\n\n");
            let request = ChatRequest::json(self.model_name, ROLLUP_MAP_SYSTEM, &joined);
            let summary = match self.model.complete(&request).await {
                Ok(raw) => extract_json(&raw)
                    .ok()
                    .and_then(|j| j.get("summary").and_then(Value::as_str).map(str::to_string)),
                Err(e) => {
                    tracing::warn!(chunk = index, error = %e, "rollup map chunk failed");
                    None
                }
            };
            match summary {
                Some(s) => partials.push(s),
                None => {
                    map_failures += 1;
                    notes.push(format!("map chunk {index} failed"));
                }
            }
        }

        if partials.is_empty() {
            return Err(SummarizerError::AllChunksFailed(chunk_count));
        }

        let text = if partials.len() == 1 {
            partials.remove(0)
        } else {
            let joined = partials.join("\n");
            let request = ChatRequest::json(self.model_name, ROLLUP_REDUCE_SYSTEM, &joined);
            let raw = self.model.complete(&request).await?;
            extract_json(&raw)?
                .get("summary")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| SummarizerError::Parse("missing 'summary'".to_string()))?
        };

        Ok((
            text,
            Validation {
                total: partials.len().max(1),
                chunks_considered: chunk_count - map_failures,
                map_failures,
                notes,
            },
        ))
    }
}

/// Deduplicate by id (max confidence wins), rank by max confidence then
/// occurrence count, cap the list.
pub fn dedupe_and_rank(candidates: Vec<Candidate>, cap: usize) -> Vec<Candidate> {
    let mut best: HashMap<String, (Candidate, usize)> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for candidate in candidates {
        let key = candidate
            .message_id
            .clone()
            .unwrap_or_else(|| format!("reason:{}", candidate.reason));
        match best.get_mut(&key) {
            Some((kept, count)) => {
                *count += 1;
                if candidate.confidence > kept.confidence {
                    *kept = candidate;
                }
            }
            None => {
                order.push(key.clone());
                best.insert(key, (candidate, 1));
            }
        }
    }

    let mut ranked: Vec<(Candidate, usize, usize)> = order
        .into_iter()
        .enumerate()
        .filter_map(|(seen_at, key)| best.remove(&key).map(|(c, n)| (c, n, seen_at)))
        .collect();
    ranked.sort_by(|a, b| {
        b.0.confidence
            .partial_cmp(&a.0.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.1.cmp(&a.1))
            .then_with(|| a.2.cmp(&b.2))
    });
    ranked.truncate(cap);
    ranked.into_iter().map(|(c, _, _)| c).collect()
}
