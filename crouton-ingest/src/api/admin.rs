//! Outbox administration endpoints

use axum::{
    body::Bytes,
    extract::State,
    routing::{get, post},
    Json, Router,
};
use crouton_common::api::{OutboxStatsResponse, RequeueRequest, RequeueResponse};
use crouton_common::db::outbox;

use crate::error::{IngestError, IngestResult};
use crate::AppState;

/// GET /admin/outbox/stats
pub async fn outbox_stats(State(state): State<AppState>) -> IngestResult<Json<OutboxStatsResponse>> {
    Ok(Json(outbox::status_counts(&state.db).await?))
}

/// POST /admin/outbox/requeue
///
/// Body: `{"ids": [..], "include_dead": bool}`; both optional. An empty
/// body requeues every failed event.
pub async fn requeue_outbox(
    State(state): State<AppState>,
    body: Bytes,
) -> IngestResult<Json<RequeueResponse>> {
    let request: RequeueRequest = if body.iter().all(u8::is_ascii_whitespace) {
        RequeueRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| IngestError::InvalidRequest(format!("Invalid requeue request: {}", e)))?
    };

    let requeued = outbox::requeue(&state.db, &request).await?;
    Ok(Json(RequeueResponse { requeued }))
}

/// Unauthenticated read routes
pub fn stats_routes() -> Router<AppState> {
    Router::new().route("/admin/outbox/stats", get(outbox_stats))
}

/// Signed mutation routes
pub fn requeue_routes() -> Router<AppState> {
    Router::new().route("/admin/outbox/requeue", post(requeue_outbox))
}
