//! Shared HTTP API functionality
//!
//! Contains only framework-free pieces used by both binaries and by
//! clients: request signature verification and wire types. The ingest
//! service wraps these with axum extractors and responses.

pub mod auth;
pub mod types;

pub use auth::{sign, verify, SignatureError, SIGNATURE_HEADER, SIGNATURE_PREFIX};
pub use types::{
    ErrorResponse, IngestResponse, OutboxStatsResponse, RejectedLine, RequeueRequest,
    RequeueResponse,
};
