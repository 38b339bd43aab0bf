//! Error types for crouton-ingest
//!
//! Every failure reaching a caller carries a stable machine-readable code
//! and a human-readable message. Validation failures also name the
//! offending 1-based line.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use crouton_common::api::ErrorResponse;
use thiserror::Error;

/// Ingestion and admin API error
#[derive(Debug, Error)]
pub enum IngestError {
    /// Missing, malformed or mismatching `X-Signature` (401)
    #[error("request signature is missing or invalid")]
    SignatureInvalid,

    /// Zero-length body (400)
    #[error("request body is empty")]
    EmptyBody,

    /// Body contains only blank lines (400)
    #[error("request body contains no records")]
    NoLines,

    /// Body exceeds the transport limit (413)
    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    /// A single line exceeds `max_line_bytes` (413)
    #[error("line {line} is {size} bytes, limit is {limit}")]
    LineTooLarge { line: usize, size: usize, limit: usize },

    /// Line is not a JSON object of the expected shape (400)
    #[error("line {line}: {message}")]
    MalformedJsonLine { line: usize, message: String },

    /// `source_url` or `text` absent or blank (400)
    #[error("line {line}: missing required field `{field}`")]
    MissingRequiredField { line: usize, field: &'static str },

    /// Malformed non-NDJSON request (admin body, query string) (400)
    #[error("{0}")]
    InvalidRequest(String),

    /// Store failure; the transaction was rolled back (500)
    #[error("persistence failure: {0}")]
    Persistence(#[from] crouton_common::Error),
}

impl IngestError {
    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::SignatureInvalid => "signature_invalid",
            IngestError::EmptyBody => "empty_body",
            IngestError::NoLines => "no_lines",
            IngestError::BodyTooLarge { .. } => "body_too_large",
            IngestError::LineTooLarge { .. } => "line_too_large",
            IngestError::MalformedJsonLine { .. } => "malformed_json_line",
            IngestError::MissingRequiredField { .. } => "missing_required_field",
            IngestError::InvalidRequest(_) => "invalid_request",
            IngestError::Persistence(_) => "persistence_failure",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            IngestError::SignatureInvalid => StatusCode::UNAUTHORIZED,
            IngestError::BodyTooLarge { .. } | IngestError::LineTooLarge { .. } => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            IngestError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            IngestError::EmptyBody
            | IngestError::NoLines
            | IngestError::MalformedJsonLine { .. }
            | IngestError::MissingRequiredField { .. }
            | IngestError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Offending line, for per-line validation failures
    pub fn line(&self) -> Option<usize> {
        match self {
            IngestError::LineTooLarge { line, .. }
            | IngestError::MalformedJsonLine { line, .. }
            | IngestError::MissingRequiredField { line, .. } => Some(*line),
            _ => None,
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = self.status();

        if let IngestError::Persistence(ref err) = self {
            tracing::error!(error = %err, "Batch rolled back");
        }

        let body = Json(ErrorResponse {
            error: self.code().to_string(),
            message: self.to_string(),
            line: self.line(),
        });

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type IngestResult<T> = Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_statuses() {
        let cases = [
            (IngestError::SignatureInvalid, "signature_invalid", 401),
            (IngestError::EmptyBody, "empty_body", 400),
            (IngestError::NoLines, "no_lines", 400),
            (IngestError::BodyTooLarge { limit: 10 }, "body_too_large", 413),
            (
                IngestError::LineTooLarge { line: 2, size: 11, limit: 10 },
                "line_too_large",
                413,
            ),
            (
                IngestError::MalformedJsonLine { line: 2, message: "x".into() },
                "malformed_json_line",
                400,
            ),
            (
                IngestError::MissingRequiredField { line: 2, field: "text" },
                "missing_required_field",
                400,
            ),
            (
                IngestError::Persistence(crouton_common::Error::Internal("x".into())),
                "persistence_failure",
                500,
            ),
        ];

        for (err, code, status) in cases {
            assert_eq!(err.code(), code);
            assert_eq!(err.status().as_u16(), status);
        }
    }

    #[test]
    fn test_line_only_for_line_errors() {
        assert_eq!(
            IngestError::MissingRequiredField { line: 3, field: "source_url" }.line(),
            Some(3)
        );
        assert_eq!(IngestError::SignatureInvalid.line(), None);
    }
}
