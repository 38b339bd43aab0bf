//! Error types for crouton-drain

use thiserror::Error;

/// Failure applying an event downstream
///
/// Recorded in the event row by a nack; never returned to the original
/// ingestion caller.
#[derive(Debug, Error)]
pub enum ProjectorError {
    /// Transport failure (connect, timeout, TLS)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Downstream answered with a non-success status
    #[error("downstream rejected event with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Payload lacks a field the projection needs
    #[error("invalid {event_type} payload: {message}")]
    InvalidPayload { event_type: String, message: String },
}
