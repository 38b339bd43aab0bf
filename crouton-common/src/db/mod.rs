//! Persistent store: schema, capture triggers, drain protocol and settings

pub mod init;
pub mod models;
pub mod outbox;
pub mod retry;
pub mod settings;
pub mod triggers;

pub use init::*;
pub use models::*;
pub use retry::retry_on_lock;
pub use settings::DrainSettings;
