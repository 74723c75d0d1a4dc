//! HTTP server assembly.

use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::{HttpConfig, RealtimeConfig};
use crate::dispatch::Dispatcher;
use crate::retrieval::RetrievalEngine;
use crate::store::DataStore;
use crate::types::RuntimeError;
use crate::vector::VectorStore;

use super::routes;

/// Shared state for all route handlers.
pub struct AppState {
    pub retrieval: Arc<RetrievalEngine>,
    pub dispatcher: Arc<Dispatcher>,
    pub store: Arc<DataStore>,
    pub vectors: Arc<dyn VectorStore>,
    pub webhook_secret: Option<String>,
    pub realtime: Option<RealtimeConfig>,
    /// Tenant used when retrieval requests omit a namespace.
    pub default_grant: Option<String>,
}

/// Build the API router. Exposed separately from [`serve`] for tests.
pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/health", get(routes::health))
        .route("/search", post(routes::search))
        .route("/aggregate", post(routes::aggregate))
        .route("/count", post(routes::count))
        .route("/analyze", post(routes::analyze))
        .route("/sync/backfill", post(routes::sync_backfill))
        .route("/sync/delta", post(routes::sync_delta))
        .route("/webhooks/mail", post(routes::webhook_mail))
        .route("/user/jobs", get(routes::user_jobs))
        .route("/user/sync-progress/:job_id", get(routes::sync_progress))
        .route("/user", delete(routes::delete_user))
        .route("/realtime/session", post(routes::realtime_session))
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: Arc<AppState>, config: &HttpConfig) -> Result<(), RuntimeError> {
    let address = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|e| RuntimeError::Internal(format!("failed to bind {address}: {e}")))?;
    tracing::info!(%address, "HTTP API listening");
    axum::serve(listener, build_router(state))
        .await
        .map_err(|e| RuntimeError::Internal(format!("server error: {e}")))
}
