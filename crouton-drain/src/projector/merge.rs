//! In-memory merge projector
//!
//! Models a graph index: facts keyed by fact id, triples keyed by
//! (subject, predicate, object), participation keyed by row id. Applying
//! an event twice leaves the same state as applying it once. Used for
//! `--dry-run` and in tests.

use async_trait::async_trait;
use crouton_common::db::{EventType, OutboxEvent};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::Projector;
use crate::error::ProjectorError;

/// Triple natural key
pub type TripleKey = (String, String, String);

/// Point-in-time copy of the projected state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectionSnapshot {
    /// Latest fact snapshot per fact id
    pub facts: BTreeMap<String, Value>,
    /// Evidence fact id per triple; the first write wins
    pub triples: BTreeMap<TripleKey, Option<String>>,
    /// Published participation rows per row id
    pub participation: BTreeMap<i64, Value>,
}

#[derive(Default)]
pub struct MergeProjector {
    state: RwLock<ProjectionSnapshot>,
}

impl MergeProjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> ProjectionSnapshot {
        self.state.read().await.clone()
    }
}

#[async_trait]
impl Projector for MergeProjector {
    fn name(&self) -> &'static str {
        "merge"
    }

    async fn apply(&self, event: &OutboxEvent) -> Result<(), ProjectorError> {
        let payload = &event.payload;
        let mut state = self.state.write().await;

        match event.event_type {
            EventType::FactInsert | EventType::FactUpdate => {
                let id = str_field(event, "id")?;
                state.facts.insert(id, payload.clone());
            }
            EventType::TripleInsert => {
                let key = (
                    str_field(event, "subject")?,
                    str_field(event, "predicate")?,
                    str_field(event, "object")?,
                );
                let evidence = payload
                    .get("evidence_fact_id")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                state.triples.entry(key).or_insert(evidence);
            }
            EventType::ParticipationInsert => {
                let id = payload.get("id").and_then(Value::as_i64).ok_or_else(|| {
                    invalid(event, "missing integer field `id`".to_string())
                })?;
                state.participation.insert(id, payload.clone());
            }
        }

        Ok(())
    }
}

fn str_field(event: &OutboxEvent, field: &str) -> Result<String, ProjectorError> {
    event
        .payload
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| invalid(event, format!("missing string field `{}`", field)))
}

fn invalid(event: &OutboxEvent, message: String) -> ProjectorError {
    ProjectorError::InvalidPayload {
        event_type: event.event_type.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crouton_common::db::OutboxStatus;
    use serde_json::json;

    fn event(id: i64, event_type: EventType, payload: Value) -> OutboxEvent {
        OutboxEvent {
            id,
            event_type,
            payload,
            occurred_at: "2026-01-01T00:00:00.000Z".to_string(),
            status: OutboxStatus::Processing,
            attempts: 0,
            error: None,
            claim_token: Some("token".to_string()),
        }
    }

    #[tokio::test]
    async fn test_redelivery_leaves_state_unchanged() {
        let projector = MergeProjector::new();
        let events = [
            event(1, EventType::FactInsert, json!({"id": "f1", "text": "t"})),
            event(2, EventType::TripleInsert,
                json!({"subject": "A", "predicate": "offers", "object": "B", "evidence_fact_id": "f1"})),
            event(3, EventType::ParticipationInsert, json!({"id": 7, "source_domain": "x.org"})),
        ];

        for e in &events {
            projector.apply(e).await.unwrap();
        }
        let once = projector.snapshot().await;

        for e in &events {
            projector.apply(e).await.unwrap();
        }
        assert_eq!(projector.snapshot().await, once);
        assert_eq!(once.facts.len(), 1);
        assert_eq!(once.triples.len(), 1);
        assert_eq!(once.participation.len(), 1);
    }

    #[tokio::test]
    async fn test_triple_keeps_first_evidence() {
        let projector = MergeProjector::new();
        let triple = |evidence: &str| {
            json!({"subject": "A", "predicate": "offers", "object": "B", "evidence_fact_id": evidence})
        };

        projector.apply(&event(1, EventType::TripleInsert, triple("f1"))).await.unwrap();
        projector.apply(&event(2, EventType::TripleInsert, triple("f2"))).await.unwrap();

        let snapshot = projector.snapshot().await;
        let key = ("A".to_string(), "offers".to_string(), "B".to_string());
        assert_eq!(snapshot.triples[&key].as_deref(), Some("f1"));
    }

    #[tokio::test]
    async fn test_fact_update_replaces_snapshot() {
        let projector = MergeProjector::new();
        projector
            .apply(&event(1, EventType::FactInsert, json!({"id": "f1", "text": "v1"})))
            .await
            .unwrap();
        projector
            .apply(&event(2, EventType::FactUpdate, json!({"id": "f1", "text": "v2"})))
            .await
            .unwrap();

        let snapshot = projector.snapshot().await;
        assert_eq!(snapshot.facts["f1"]["text"], "v2");
    }

    #[tokio::test]
    async fn test_malformed_payload_is_an_error() {
        let projector = MergeProjector::new();
        let err = projector
            .apply(&event(1, EventType::TripleInsert, json!({"subject": "A"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ProjectorError::InvalidPayload { .. }));
        assert!(err.to_string().contains("triple.insert"));
    }
}
