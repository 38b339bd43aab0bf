//! # Crouton Common Library
//!
//! Shared code for the crouton ingestion service and the outbox drain
//! consumer:
//! - SQLite store initialization, constraints and capture triggers
//! - Outbox drain protocol operations (claim, ack, nack, requeue)
//! - Request signature verification
//! - Content hashing for delivery idempotence
//! - Bootstrap configuration loading
//! - Shutdown signal handling shared by both binaries

pub mod api;
pub mod config;
pub mod content_hash;
pub mod db;
pub mod error;
pub mod shutdown;
pub mod time;

pub use error::{Error, Result};
