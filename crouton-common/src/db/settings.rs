//! Runtime drain settings stored in the `settings` table
//!
//! Database-first: each setting is read from `settings`; a missing or
//! NULL value is replaced by the built-in default, which is written back
//! so operators can see and edit it.

use sqlx::SqlitePool;
use std::time::Duration;
use tracing::{info, warn};

use super::outbox::RetryPolicy;
use crate::time::SQL_NOW;
use crate::{Error, Result};

/// Drain worker tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainSettings {
    /// Events claimed per poll
    pub batch_size: u32,
    /// Sleep between polls that found no work
    pub poll_interval: Duration,
    /// Attempts before an event is quarantined as `dead`
    pub max_attempts: u32,
    /// Claims older than this are presumed abandoned by a dead worker
    pub processing_timeout: Duration,
    /// Backoff before the first automatic retry
    pub retry_backoff_base: Duration,
    /// Backoff ceiling
    pub retry_backoff_max: Duration,
    /// Concurrent drain workers
    pub workers: u32,
}

impl Default for DrainSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval: Duration::from_millis(1000),
            max_attempts: 5,
            processing_timeout: Duration::from_millis(300_000),
            retry_backoff_base: Duration::from_millis(1000),
            retry_backoff_max: Duration::from_millis(300_000),
            workers: 2,
        }
    }
}

impl DrainSettings {
    /// Setting keys read by [`DrainSettings::load`], all integers
    pub const KEYS: [&'static str; 7] = [
        "drain_batch_size",
        "drain_poll_interval_ms",
        "drain_max_attempts",
        "drain_processing_timeout_ms",
        "drain_retry_backoff_base_ms",
        "drain_retry_backoff_max_ms",
        "drain_workers",
    ];

    /// Load drain settings, writing defaults back for missing keys
    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        let defaults = Self::default();

        let settings = Self {
            batch_size: positive(
                "drain_batch_size",
                get_setting(pool, "drain_batch_size", u64::from(defaults.batch_size)).await?,
            )? as u32,
            poll_interval: Duration::from_millis(positive(
                "drain_poll_interval_ms",
                get_setting(
                    pool,
                    "drain_poll_interval_ms",
                    defaults.poll_interval.as_millis() as u64,
                )
                .await?,
            )?),
            max_attempts: positive(
                "drain_max_attempts",
                get_setting(pool, "drain_max_attempts", u64::from(defaults.max_attempts)).await?,
            )? as u32,
            processing_timeout: Duration::from_millis(
                get_setting(
                    pool,
                    "drain_processing_timeout_ms",
                    defaults.processing_timeout.as_millis() as u64,
                )
                .await?,
            ),
            retry_backoff_base: Duration::from_millis(
                get_setting(
                    pool,
                    "drain_retry_backoff_base_ms",
                    defaults.retry_backoff_base.as_millis() as u64,
                )
                .await?,
            ),
            retry_backoff_max: Duration::from_millis(
                get_setting(
                    pool,
                    "drain_retry_backoff_max_ms",
                    defaults.retry_backoff_max.as_millis() as u64,
                )
                .await?,
            ),
            workers: positive(
                "drain_workers",
                get_setting(pool, "drain_workers", u64::from(defaults.workers)).await?,
            )? as u32,
        };

        Ok(settings)
    }

    /// Retry policy derived from these settings
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff_base: self.retry_backoff_base,
            backoff_max: self.retry_backoff_max,
        }
    }
}

/// Store a setting value
pub async fn set_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(&format!(
        "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, {now})
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        now = SQL_NOW
    ))
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;

    Ok(())
}

async fn get_setting(pool: &SqlitePool, key: &str, default: u64) -> Result<u64> {
    let value: Option<Option<String>> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;

    match value.flatten() {
        Some(raw) => raw.trim().parse::<u64>().map_err(|e| {
            Error::Config(format!("Setting '{}' has invalid value '{}': {}", key, raw, e))
        }),
        None => {
            info!("Setting '{}' not found in database, using default: {}", key, default);
            set_setting(pool, key, &default.to_string()).await?;
            Ok(default)
        }
    }
}

fn positive(key: &str, value: u64) -> Result<u64> {
    if value == 0 || value > u64::from(u32::MAX) {
        warn!("Setting '{}' out of range: {}", key, value);
        return Err(Error::Config(format!(
            "Setting '{}' must be between 1 and {}",
            key,
            u32::MAX
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::init_database;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_defaults_written_back() {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("settings.db")).await.unwrap();

        let settings = DrainSettings::load(&pool).await.unwrap();
        assert_eq!(settings, DrainSettings::default());

        let stored: Option<String> =
            sqlx::query_scalar("SELECT value FROM settings WHERE key = 'drain_max_attempts'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(stored.as_deref(), Some("5"));
    }

    #[tokio::test]
    async fn test_stored_values_override_defaults() {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("settings.db")).await.unwrap();

        set_setting(&pool, "drain_batch_size", "7").await.unwrap();
        set_setting(&pool, "drain_processing_timeout_ms", "250").await.unwrap();

        let settings = DrainSettings::load(&pool).await.unwrap();
        assert_eq!(settings.batch_size, 7);
        assert_eq!(settings.processing_timeout, Duration::from_millis(250));
        assert_eq!(settings.workers, 2);
    }

    #[tokio::test]
    async fn test_null_value_reset_to_default() {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("settings.db")).await.unwrap();

        sqlx::query("INSERT INTO settings (key, value) VALUES ('drain_workers', NULL)")
            .execute(&pool)
            .await
            .unwrap();

        let settings = DrainSettings::load(&pool).await.unwrap();
        assert_eq!(settings.workers, 2);
    }

    #[tokio::test]
    async fn test_invalid_values_rejected() {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("settings.db")).await.unwrap();

        set_setting(&pool, "drain_max_attempts", "0").await.unwrap();
        assert!(matches!(DrainSettings::load(&pool).await, Err(Error::Config(_))));

        set_setting(&pool, "drain_max_attempts", "many").await.unwrap();
        assert!(matches!(DrainSettings::load(&pool).await, Err(Error::Config(_))));

        set_setting(&pool, "drain_max_attempts", "5").await.unwrap();
        set_setting(&pool, "drain_poll_interval_ms", "0").await.unwrap();
        assert!(matches!(DrainSettings::load(&pool).await, Err(Error::Config(_))));
    }
}
