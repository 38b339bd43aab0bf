//! Wire types shared by the ingest service, the drain CLI and clients

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Successful ingestion result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResponse {
    /// Facts newly persisted
    pub accepted: u64,
    /// Facts absorbed by deduplication
    pub skipped: u64,
    /// Facts rewritten through explicit natural-id upsert
    #[serde(default)]
    pub updated: u64,
    /// Records parsed from the batch (excluding rejected lines)
    pub total: u64,
    /// Lines rejected in lenient mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected: Option<Vec<RejectedLine>>,
}

/// A line refused by lenient batch handling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedLine {
    pub line: usize,
    pub error: String,
    pub message: String,
}

/// Error body for every failed request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable machine-readable code, e.g. `malformed_json_line`
    pub error: String,
    /// Human-readable description
    pub message: String,
    /// Offending 1-based line number, when one applies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

/// Operator requeue of failed outbox events
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequeueRequest {
    /// Specific event ids; all failed events when absent
    #[serde(default)]
    pub ids: Option<Vec<i64>>,
    /// Also revive quarantined (`dead`) events
    #[serde(default)]
    pub include_dead: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequeueResponse {
    pub requeued: u64,
}

/// Outbox row counts keyed by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxStatsResponse {
    pub counts: BTreeMap<String, i64>,
    pub oldest_pending_id: Option<i64>,
}
