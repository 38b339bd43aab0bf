//! HTTP API handlers for crouton-ingest

pub mod admin;
pub mod auth;
pub mod health;
pub mod ingest;

pub use admin::{requeue_routes, stats_routes};
pub use auth::signature_middleware;
pub use health::health_routes;
pub use ingest::ingest_routes;
