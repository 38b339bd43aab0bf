//! Signature middleware
//!
//! Buffers the request body (bounded by `ingest.max_body_bytes`), checks
//! `X-Signature` over the exact received bytes, then hands the same bytes
//! to the handler. Applied to every mutating route.

use axum::{
    body::Body,
    extract::{Request, State},
    http::header::CONTENT_LENGTH,
    middleware::Next,
    response::Response,
};
use crouton_common::api::auth::check_signature;
use crouton_common::api::SIGNATURE_HEADER;
use tracing::warn;

use crate::error::IngestError;
use crate::AppState;

/// Authentication middleware
///
/// Fails closed: any header problem or mismatch is `signature_invalid`.
pub async fn signature_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, IngestError> {
    let limit = state.ingest.max_body_bytes;
    let (parts, body) = request.into_parts();

    let declared = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(IngestError::BodyTooLarge { limit });
    }

    let body_bytes = axum::body::to_bytes(body, limit).await.map_err(|e| {
        if e.to_string().contains("length limit") {
            IngestError::BodyTooLarge { limit }
        } else {
            IngestError::InvalidRequest(format!("Failed to read body: {}", e))
        }
    })?;

    let header = parts
        .headers
        .get(SIGNATURE_HEADER)
        .map(|v| v.to_str().unwrap_or_default());

    if let Err(reason) = check_signature(&state.signing_secret, &body_bytes, header) {
        // Never log the provided signature
        warn!(
            path = %parts.uri.path(),
            body_bytes = body_bytes.len(),
            %reason,
            "Rejected request signature"
        );
        return Err(IngestError::SignatureInvalid);
    }

    let request = Request::from_parts(parts, Body::from(body_bytes));
    Ok(next.run(request).await)
}
