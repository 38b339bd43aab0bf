//! Downstream projection of outbox events
//!
//! Delivery is at-least-once: the same event can be applied again after
//! a worker crashes between apply and ack, so every implementation must
//! be idempotent (merge by natural key, never blind append).

use async_trait::async_trait;
use crouton_common::db::OutboxEvent;

use crate::error::ProjectorError;

pub mod http;
pub mod merge;

pub use http::HttpProjector;
pub use merge::{MergeProjector, ProjectionSnapshot};

/// Projector trait - all downstream targets implement this
#[async_trait]
pub trait Projector: Send + Sync {
    /// Projector identifier used in logs
    fn name(&self) -> &'static str;

    /// Apply one event downstream
    ///
    /// # Returns
    /// * `Ok(())` - Applied (or already present); the event is acked
    /// * `Err(_)` - Not applied; the event is nacked with the error text
    async fn apply(&self, event: &OutboxEvent) -> Result<(), ProjectorError>;
}
