//! crouton-ingest library
//!
//! Signature-authenticated NDJSON ingestion of facts and triples. Each
//! batch commits in one transaction together with the outbox events the
//! capture triggers emit for it.

use std::sync::Arc;

use axum::{extract::DefaultBodyLimit, middleware, Router};
use crouton_common::config::IngestConfig;
use sqlx::SqlitePool;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod record;

pub use error::{IngestError, IngestResult};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// HMAC key for `X-Signature`
    pub signing_secret: Arc<[u8]>,
    /// Limits and batch policy
    pub ingest: IngestConfig,
}

impl AppState {
    pub fn new(db: SqlitePool, signing_secret: &str, ingest: IngestConfig) -> Self {
        Self {
            db,
            signing_secret: Arc::from(signing_secret.as_bytes()),
            ingest,
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    // Signed routes; the middleware enforces the body limit
    let signed = Router::new()
        .merge(api::ingest_routes())
        .merge(api::requeue_routes())
        .layer(DefaultBodyLimit::disable())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::signature_middleware,
        ));

    let public = Router::new()
        .merge(api::health_routes())
        .merge(api::stats_routes());

    Router::new()
        .merge(signed)
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
