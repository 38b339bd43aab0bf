//! crouton-drain library
//!
//! Reference consumer of the outbox: claims pending events, applies them
//! through a [`Projector`], and acks or nacks each one. Also hosts the
//! maintenance loop that recovers timed-out claims and requeues failed
//! events under the retry policy.

pub mod error;
pub mod projector;
pub mod worker;

pub use error::ProjectorError;
pub use projector::{HttpProjector, MergeProjector, Projector};
pub use worker::{drain_once, maintenance_pass, run_pool, DrainWorker, PassStats};
