//! Request and response DTOs for the HTTP surface.
//!
//! Unknown request fields are ignored everywhere. Field casing follows the
//! wire contract: sync/job endpoints use camelCase keys, retrieval payloads
//! use snake_case.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::retrieval::{AggregateGroup, AnalysisSummary, SearchResultItem};
use crate::store::JobRecord;

/// Consistent error envelope for every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            status: None,
            body: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryText {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub queries: Vec<QueryText>,
    #[serde(default, alias = "topK")]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub filters: Option<Value>,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResultItem>,
    pub total: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregateRequest {
    /// Only `count` is supported.
    #[serde(default)]
    pub metric: Option<String>,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub filters: Option<Value>,
    #[serde(default, alias = "topK")]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateResponse {
    pub total: u64,
    pub groups: Vec<AggregateGroup>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CountRequest {
    #[serde(default)]
    pub filters: Option<Value>,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CountResponse {
    pub total: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub filters: Option<Value>,
    #[serde(default, alias = "topK")]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeResponse {
    pub summary: AnalysisSummary,
    pub count: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillRequest {
    pub grant_id: String,
    #[serde(default)]
    pub months: Option<u32>,
    #[serde(default)]
    pub max: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillResponse {
    pub ok: bool,
    pub grant_id: String,
    pub job_id: String,
    pub upserted: u64,
    pub pages: u64,
    pub took_ms: u64,
    pub since: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaRequest {
    pub grant_id: String,
    #[serde(default)]
    pub max: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaResponse {
    pub ok: bool,
    pub grant_id: String,
    pub job_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookResponse {
    pub ok: bool,
    pub enqueued: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsQuery {
    #[serde(rename = "grantId")]
    pub grant_id: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobsResponse {
    pub ok: bool,
    pub jobs: Vec<JobRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobResponse {
    pub ok: bool,
    pub job: JobRecord,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteUserRequest {
    pub grant_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeletedCounts {
    pub vectors: u64,
    pub summaries: u64,
    pub jobs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteUserResponse {
    pub ok: bool,
    pub deleted: DeletedCounts,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}
