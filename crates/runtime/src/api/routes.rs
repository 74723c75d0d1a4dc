//! HTTP route handlers.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use serde_json::Value;
use std::sync::Arc;

use crate::types::{ErrorKind, GrantId, JobId, RuntimeError};
use crate::vector::filter;
use crate::voice::mint_ephemeral_token;

use super::server::AppState;
use super::types::*;
use super::webhook::{verify_signature, SIGNATURE_HEADER};

type ApiError = (StatusCode, Json<ErrorBody>);

fn error_response(error: RuntimeError) -> ApiError {
    let status = match error.kind() {
        ErrorKind::Validation | ErrorKind::Data => StatusCode::BAD_REQUEST,
        ErrorKind::Auth => StatusCode::UNAUTHORIZED,
        ErrorKind::Transient => StatusCode::BAD_GATEWAY,
        ErrorKind::Partial | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorBody {
            error: error.to_string(),
            status: Some(status.as_u16()),
            body: None,
        }),
    )
}

fn bad_request(message: impl Into<String>) -> ApiError {
    let message = message.into();
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            error: message,
            status: Some(400),
            body: None,
        }),
    )
}

/// Resolve the tenant for retrieval requests: explicit namespace, falling
/// back to the node's default grant.
fn resolve_namespace(state: &AppState, namespace: Option<String>) -> Result<GrantId, ApiError> {
    namespace
        .filter(|n| !n.is_empty())
        .or_else(|| state.default_grant.clone())
        .map(GrantId::new)
        .ok_or_else(|| bad_request("namespace is required (no default grant configured)"))
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let namespace = resolve_namespace(&state, request.namespace)?;
    let query = request
        .queries
        .first()
        .map(|q| q.text.clone())
        .ok_or_else(|| bad_request("queries[0].text is required"))?;
    let top_k = request.top_k.unwrap_or(10);

    let outcome = state
        .retrieval
        .search(&namespace, &query, top_k, request.filters)
        .await
        .map_err(error_response)?;
    Ok(Json(SearchResponse {
        results: outcome.results,
        total: outcome.total,
    }))
}

pub async fn aggregate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AggregateRequest>,
) -> Result<Json<AggregateResponse>, ApiError> {
    if let Some(metric) = &request.metric {
        if metric != "count" {
            return Err(bad_request(format!("unsupported metric '{metric}'")));
        }
    }
    let namespace = resolve_namespace(&state, request.namespace)?;
    let top_k = request.top_k.unwrap_or(1000);

    let outcome = state
        .retrieval
        .aggregate(&namespace, &request.group_by, request.filters, top_k)
        .await
        .map_err(error_response)?;
    Ok(Json(AggregateResponse {
        total: outcome.total,
        groups: outcome.groups,
    }))
}

pub async fn count(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CountRequest>,
) -> Result<Json<CountResponse>, ApiError> {
    let namespace = resolve_namespace(&state, request.namespace)?;
    let total = state
        .retrieval
        .count(&namespace, request.filters)
        .await
        .map_err(error_response)?;
    Ok(Json(CountResponse { total }))
}

pub async fn analyze(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    if request.text.is_empty() {
        return Err(bad_request("text is required"));
    }
    let namespace = resolve_namespace(&state, request.namespace)?;
    let top_k = request.top_k.unwrap_or(10);

    let outcome = state
        .retrieval
        .analyze(&namespace, &request.text, request.filters, top_k)
        .await
        .map_err(error_response)?;
    Ok(Json(AnalyzeResponse {
        summary: outcome.summary,
        count: outcome.count,
    }))
}

pub async fn sync_backfill(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BackfillRequest>,
) -> Result<Json<BackfillResponse>, ApiError> {
    let started = std::time::Instant::now();
    let record = state
        .dispatcher
        .start_backfill(GrantId::new(request.grant_id), request.months, request.max)
        .await
        .map_err(|e| error_response(RuntimeError::Dispatch(e)))?;
    Ok(Json(BackfillResponse {
        ok: true,
        grant_id: record.grant_id.to_string(),
        job_id: record.job_id.to_string(),
        upserted: record.indexed_vectors,
        pages: record.processed.div_ceil(50),
        took_ms: started.elapsed().as_millis() as u64,
        since: record.since_epoch,
    }))
}

pub async fn sync_delta(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DeltaRequest>,
) -> Result<Json<DeltaResponse>, ApiError> {
    let record = state
        .dispatcher
        .start_delta(GrantId::new(request.grant_id), request.max)
        .await
        .map_err(|e| error_response(RuntimeError::Dispatch(e)))?;
    Ok(Json(DeltaResponse {
        ok: true,
        grant_id: record.grant_id.to_string(),
        job_id: record.job_id.to_string(),
    }))
}

/// HMAC-verified mail webhook. Unverified requests return 401 with no side
/// effects.
pub async fn webhook_mail(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let Some(secret) = &state.webhook_secret else {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorBody::new("webhook secret not configured")),
        ));
    };
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(ErrorBody::new(format!("missing {SIGNATURE_HEADER} header"))),
            )
        })?;
    if let Err(e) = verify_signature(secret.as_bytes(), signature, &body) {
        return Err((StatusCode::UNAUTHORIZED, Json(ErrorBody::new(e.to_string()))));
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| bad_request(format!("invalid webhook body: {e}")))?;
    let event_type = payload
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let grant_id = payload
        .pointer("/data/grant_id")
        .or_else(|| payload.get("grant_id"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    let enqueued = if matches!(event_type, "message.created" | "message.updated")
        && !grant_id.is_empty()
    {
        state
            .dispatcher
            .webhook_delta(GrantId::new(grant_id))
            .await
            .map_err(|e| error_response(RuntimeError::Dispatch(e)))?;
        true
    } else {
        tracing::debug!(event_type, "webhook event ignored");
        false
    };

    Ok(Json(WebhookResponse { ok: true, enqueued }))
}

pub async fn user_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<JobsQuery>,
) -> Result<Json<JobsResponse>, ApiError> {
    let jobs = state
        .store
        .jobs
        .list(&GrantId::new(query.grant_id), query.limit.unwrap_or(20))
        .map_err(|e| error_response(RuntimeError::Store(e)))?;
    Ok(Json(JobsResponse { ok: true, jobs }))
}

pub async fn sync_progress(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job_id: JobId = job_id
        .parse()
        .map_err(|_| bad_request(format!("invalid job id '{job_id}'")))?;
    let job = state
        .store
        .jobs
        .get(job_id)
        .map_err(|e| error_response(RuntimeError::Store(e)))?;
    Ok(Json(JobResponse { ok: true, job }))
}

/// Purge a tenant: vectors, summaries, checkpoint, and jobs.
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DeleteUserRequest>,
) -> Result<Json<DeleteUserResponse>, ApiError> {
    if request.grant_id.trim().is_empty() {
        return Err(bad_request("grantId is required"));
    }
    let grant = GrantId::new(request.grant_id);

    let vectors = state
        .vectors
        .delete_by_filter(
            &grant,
            filter::with(None, "grant_id", filter::eq(grant.as_str())),
        )
        .await
        .map_err(|e| error_response(RuntimeError::Vector(e)))?;
    let (summaries, jobs) = state
        .store
        .purge_grant(&grant)
        .map_err(|e| error_response(RuntimeError::Store(e)))?;

    tracing::info!(grant_id = %grant, vectors, summaries, jobs, "tenant purged");
    Ok(Json(DeleteUserResponse {
        ok: true,
        deleted: DeletedCounts {
            vectors,
            summaries,
            jobs,
        },
    }))
}

/// Mint an ephemeral realtime token for the browser client.
pub async fn realtime_session(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    let Some(config) = &state.realtime else {
        return Err(bad_request("realtime provider not configured"));
    };
    let session = mint_ephemeral_token(config)
        .await
        .map_err(|e| error_response(RuntimeError::Voice(e)))?;
    Ok(Json(session))
}
