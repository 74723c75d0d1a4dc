//! HTTP API: retrieval endpoints, sync dispatch, webhook intake, tenant
//! purge, and the realtime token mint.

pub mod routes;
pub mod server;
pub mod types;
pub mod webhook;

pub use server::{build_router, serve, AppState};
pub use webhook::{sign, verify_signature, SIGNATURE_HEADER};
