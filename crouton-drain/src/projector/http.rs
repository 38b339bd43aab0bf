//! HTTP projector
//!
//! POSTs each event as JSON to a downstream endpoint. The event id is
//! sent as `Idempotency-Key` so the receiver can discard redeliveries.

use async_trait::async_trait;
use crouton_common::db::OutboxEvent;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::Projector;
use crate::error::ProjectorError;

/// Header carrying the outbox event id
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Longest downstream error body kept in the event's `error` column
const MAX_ERROR_BODY: usize = 512;

pub struct HttpProjector {
    client: reqwest::Client,
    url: String,
}

impl HttpProjector {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ProjectorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("crouton-drain/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Projector for HttpProjector {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn apply(&self, event: &OutboxEvent) -> Result<(), ProjectorError> {
        let body = json!({
            "id": event.id,
            "event_type": event.event_type,
            "occurred_at": event.occurred_at,
            "payload": event.payload,
        });

        let response = self
            .client
            .post(&self.url)
            .header(IDEMPOTENCY_HEADER, event.id.to_string())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(event_id = event.id, status = status.as_u16(), "Event projected");
            return Ok(());
        }

        let mut text = response.text().await.unwrap_or_default();
        if text.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
        }

        Err(ProjectorError::Rejected {
            status: status.as_u16(),
            body: text,
        })
    }
}
