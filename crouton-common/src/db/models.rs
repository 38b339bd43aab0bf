//! Database models

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Subject-predicate-object assertion carried inside a fact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedTriple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

/// Persisted fact ("crouton")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub id: String,
    pub natural_id: Option<String>,
    pub source_url: String,
    pub content_hash: Option<String>,
    pub corpus_id: Option<String>,
    pub text: String,
    pub triple: Option<EmbeddedTriple>,
    pub confidence: Option<f64>,
    pub verified_at: Option<String>,
    pub created_at: String,
}

impl Fact {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let triple: Option<String> = row.try_get("triple")?;
        let triple = triple
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(|e| Error::Internal(format!("Invalid triple JSON in croutons: {}", e)))?;

        Ok(Self {
            id: row.try_get("id")?,
            natural_id: row.try_get("natural_id")?,
            source_url: row.try_get("source_url")?,
            content_hash: row.try_get("content_hash")?,
            corpus_id: row.try_get("corpus_id")?,
            text: row.try_get("text")?,
            triple,
            confidence: row.try_get("confidence")?,
            verified_at: row.try_get("verified_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Persisted triple
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Triple {
    pub id: i64,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    /// Weak reference to the fact that first evidenced this triple
    pub evidence_fact_id: Option<String>,
    pub created_at: String,
}

impl Triple {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            subject: row.try_get("subject")?,
            predicate: row.try_get("predicate")?,
            object: row.try_get("object")?,
            evidence_fact_id: row.try_get("evidence_fact_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Outbox event lifecycle state
///
/// `pending → processing → done`, or `processing → failed → pending`
/// (retry), or `processing → dead` once attempts are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Done,
    Failed,
    Dead,
}

impl OutboxStatus {
    pub const ALL: [OutboxStatus; 5] = [
        OutboxStatus::Pending,
        OutboxStatus::Processing,
        OutboxStatus::Done,
        OutboxStatus::Failed,
        OutboxStatus::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processing => "processing",
            OutboxStatus::Done => "done",
            OutboxStatus::Failed => "failed",
            OutboxStatus::Dead => "dead",
        }
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "processing" => Ok(OutboxStatus::Processing),
            "done" => Ok(OutboxStatus::Done),
            "failed" => Ok(OutboxStatus::Failed),
            "dead" => Ok(OutboxStatus::Dead),
            other => Err(Error::InvalidInput(format!("Unknown outbox status: {}", other))),
        }
    }
}

/// Kind of write an outbox event records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "fact.insert")]
    FactInsert,
    #[serde(rename = "fact.update")]
    FactUpdate,
    #[serde(rename = "triple.insert")]
    TripleInsert,
    #[serde(rename = "participation.insert")]
    ParticipationInsert,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::FactInsert => "fact.insert",
            EventType::FactUpdate => "fact.update",
            EventType::TripleInsert => "triple.insert",
            EventType::ParticipationInsert => "participation.insert",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fact.insert" => Ok(EventType::FactInsert),
            "fact.update" => Ok(EventType::FactUpdate),
            "triple.insert" => Ok(EventType::TripleInsert),
            "participation.insert" => Ok(EventType::ParticipationInsert),
            other => Err(Error::InvalidInput(format!("Unknown event type: {}", other))),
        }
    }
}

/// Row of the `outbox_events` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    /// Monotonic id; the only safe ordering key
    pub id: i64,
    pub event_type: EventType,
    /// Snapshot of the row that triggered the event
    pub payload: serde_json::Value,
    pub occurred_at: String,
    pub status: OutboxStatus,
    pub attempts: i64,
    pub error: Option<String>,
    /// Present while the event is claimed by a drain worker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_token: Option<String>,
}

impl OutboxEvent {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let event_type: String = row.try_get("event_type")?;
        let status: String = row.try_get("status")?;
        let payload: String = row.try_get("payload")?;
        let payload = serde_json::from_str(&payload)
            .map_err(|e| Error::Internal(format!("Invalid outbox payload JSON: {}", e)))?;

        Ok(Self {
            id: row.try_get("id")?,
            event_type: event_type.parse()?,
            payload,
            occurred_at: row.try_get("occurred_at")?,
            status: status.parse()?,
            attempts: row.try_get("attempts")?,
            error: row.try_get("error")?,
            claim_token: row.try_get("claim_token")?,
        })
    }
}
