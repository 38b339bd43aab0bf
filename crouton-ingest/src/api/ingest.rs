//! Ingestion endpoint

use axum::{
    body::Bytes,
    extract::{Query, State},
    routing::post,
    Json, Router,
};
use crouton_common::api::IngestResponse;
use serde::Deserialize;

use crate::coordinator::{ingest_batch, BatchOptions, UpsertMode};
use crate::error::{IngestError, IngestResult};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct IngestParams {
    /// `natural_id` enables explicit natural-id upsert
    pub upsert: Option<String>,
}

impl IngestParams {
    fn upsert_mode(&self) -> IngestResult<UpsertMode> {
        match self.upsert.as_deref() {
            None | Some("") => Ok(UpsertMode::Off),
            Some("natural_id") => Ok(UpsertMode::NaturalId),
            Some(other) => Err(IngestError::InvalidRequest(format!(
                "Unsupported upsert mode '{}', expected 'natural_id'",
                other
            ))),
        }
    }
}

/// POST /v1/croutons
///
/// Body is raw NDJSON, already signature-checked by the middleware.
pub async fn ingest_croutons(
    State(state): State<AppState>,
    Query(params): Query<IngestParams>,
    body: Bytes,
) -> IngestResult<Json<IngestResponse>> {
    let options = BatchOptions::from_config(&state.ingest, params.upsert_mode()?);
    let response = ingest_batch(&state.db, &body, &options).await?;
    Ok(Json(response))
}

/// Signed ingestion routes
pub fn ingest_routes() -> Router<AppState> {
    Router::new().route("/v1/croutons", post(ingest_croutons))
}
