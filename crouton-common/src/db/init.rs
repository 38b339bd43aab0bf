//! Database initialization
//!
//! Opens (creating if needed) the SQLite store and brings the schema,
//! uniqueness constraints and capture triggers up to date. Every step is
//! idempotent, so both binaries run it at startup.

use crate::time::SQL_NOW;
use crate::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Current schema version recorded in `schema_version`
pub const SCHEMA_VERSION: i64 = 1;

/// Connection pool tuning
#[derive(Debug, Clone)]
pub struct DbOptions {
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            busy_timeout: Duration::from_millis(1000),
        }
    }
}

impl DbOptions {
    /// Pool whose busy handler leaves room for application-level lock retries
    ///
    /// SQLite only surfaces `database is locked` after `busy_timeout` has
    /// elapsed, so the timeout is a fifth of the caller's total lock budget.
    pub fn with_lock_budget(max_lock_wait_ms: u64) -> Self {
        Self {
            busy_timeout: Duration::from_millis((max_lock_wait_ms / 5).max(50)),
            ..Self::default()
        }
    }
}

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    init_database_with(db_path, &DbOptions::default()).await
}

/// Initialize database with explicit pool options
pub async fn init_database_with(db_path: &Path, options: &DbOptions) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Pragmas go on the connect options so every pooled connection gets them
    let connect_options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(options.busy_timeout);

    let pool = SqlitePoolOptions::new()
        .max_connections(options.max_connections)
        .connect_with(connect_options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables, indexes and triggers (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_settings_table(pool).await?;
    create_croutons_table(pool).await?;
    create_triples_table(pool).await?;
    create_outbox_events_table(pool).await?;
    create_source_participation_table(pool).await?;

    // Triggers after every table they reference
    super::triggers::create_capture_triggers(pool).await?;

    record_schema_version(pool).await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT ({now})
        )
        "#,
        now = SQL_NOW
    ))
    .execute(pool)
    .await?;

    Ok(())
}

async fn record_schema_version(pool: &SqlitePool) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(SCHEMA_VERSION)
        .execute(pool)
        .await?;

    let newest: i64 = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await?;

    if newest > SCHEMA_VERSION {
        return Err(Error::Config(format!(
            "Database schema version {} is newer than this build supports ({})",
            newest, SCHEMA_VERSION
        )));
    }

    Ok(())
}

/// Create the settings table
///
/// Stores runtime key/value settings (drain tuning).
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TEXT NOT NULL DEFAULT ({now})
        )
        "#,
        now = SQL_NOW
    ))
    .execute(pool)
    .await?;

    Ok(())
}

/// Facts. `content_hash` is the deduplication key; `natural_id` is the
/// caller-addressable key. SQLite UNIQUE admits any number of NULLs.
async fn create_croutons_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS croutons (
            id TEXT PRIMARY KEY,
            natural_id TEXT UNIQUE,
            source_url TEXT NOT NULL,
            content_hash TEXT UNIQUE,
            corpus_id TEXT,
            text TEXT NOT NULL,
            triple TEXT CHECK (triple IS NULL OR json_valid(triple)),
            confidence REAL,
            verified_at TEXT,
            created_at TEXT NOT NULL DEFAULT ({now}),
            updated_at TEXT NOT NULL DEFAULT ({now})
        )
        "#,
        now = SQL_NOW
    ))
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_croutons_corpus ON croutons(corpus_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Triples. First writer wins on (subject, predicate, object);
/// `evidence_fact_id` is a weak reference with no foreign key.
async fn create_triples_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS triples (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            subject TEXT NOT NULL,
            predicate TEXT NOT NULL,
            object TEXT NOT NULL,
            evidence_fact_id TEXT,
            created_at TEXT NOT NULL DEFAULT ({now}),
            UNIQUE (subject, predicate, object)
        )
        "#,
        now = SQL_NOW
    ))
    .execute(pool)
    .await?;

    Ok(())
}

/// Outbox. This table is the wire contract with drain consumers.
///
/// AUTOINCREMENT keeps ids monotonic and never reused, even after rows
/// are deleted.
async fn create_outbox_events_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS outbox_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_type TEXT NOT NULL CHECK (event_type IN
                ('fact.insert', 'fact.update', 'triple.insert', 'participation.insert')),
            payload TEXT NOT NULL CHECK (json_valid(payload)),
            occurred_at TEXT NOT NULL DEFAULT ({now}),
            status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN
                ('pending', 'processing', 'done', 'failed', 'dead')),
            attempts INTEGER NOT NULL DEFAULT 0,
            error TEXT,
            claimed_at TEXT,
            claim_token TEXT,
            last_attempt_at TEXT
        )
        "#,
        now = SQL_NOW
    ))
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_outbox_status_id ON outbox_events(status, id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Source participation rows are written by another subsystem; the table
/// exists here so the filtered capture trigger has something to attach to.
async fn create_source_participation_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS source_participation (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_domain TEXT NOT NULL,
            corpus_id TEXT,
            published INTEGER NOT NULL DEFAULT 0 CHECK (published IN (0, 1)),
            created_at TEXT NOT NULL DEFAULT ({now})
        )
        "#,
        now = SQL_NOW
    ))
    .execute(pool)
    .await?;

    Ok(())
}
