//! Event capture triggers
//!
//! Store-side observers that append an `outbox_events` row in the same
//! transaction as the write that caused it. Because they live in the
//! store, they also capture backfills and any other direct writer, not
//! only the ingest service. A rolled-back write takes its event with it.
//!
//! `INSERT ... ON CONFLICT DO NOTHING` skips AFTER INSERT triggers, so
//! deduplicated deliveries never emit events.

use crate::Result;
use sqlx::SqlitePool;
use tracing::debug;

/// Snapshot of a `croutons` row as a JSON object expression
const FACT_SNAPSHOT: &str = r#"json_object(
            'id', NEW.id,
            'natural_id', NEW.natural_id,
            'source_url', NEW.source_url,
            'content_hash', NEW.content_hash,
            'corpus_id', NEW.corpus_id,
            'text', NEW.text,
            'triple', json(NEW.triple),
            'confidence', NEW.confidence,
            'verified_at', NEW.verified_at,
            'created_at', NEW.created_at
        )"#;

/// Install all capture triggers (idempotent)
pub async fn create_capture_triggers(pool: &SqlitePool) -> Result<()> {
    create_fact_insert_trigger(pool).await?;
    create_fact_update_trigger(pool).await?;
    create_triple_insert_trigger(pool).await?;
    create_participation_insert_trigger(pool).await?;

    debug!("Outbox capture triggers installed");
    Ok(())
}

async fn create_fact_insert_trigger(pool: &SqlitePool) -> Result<()> {
    sqlx::query(&format!(
        r#"
        CREATE TRIGGER IF NOT EXISTS trg_croutons_outbox_insert
        AFTER INSERT ON croutons
        BEGIN
            INSERT INTO outbox_events (event_type, payload)
            VALUES ('fact.insert', {snapshot});
        END
        "#,
        snapshot = FACT_SNAPSHOT
    ))
    .execute(pool)
    .await?;

    Ok(())
}

/// Only a content change counts; touching `updated_at` alone is silent
async fn create_fact_update_trigger(pool: &SqlitePool) -> Result<()> {
    sqlx::query(&format!(
        r#"
        CREATE TRIGGER IF NOT EXISTS trg_croutons_outbox_update
        AFTER UPDATE OF content_hash ON croutons
        WHEN OLD.content_hash IS NOT NEW.content_hash
        BEGIN
            INSERT INTO outbox_events (event_type, payload)
            VALUES ('fact.update', json_set({snapshot},
                '$.previous_content_hash', OLD.content_hash));
        END
        "#,
        snapshot = FACT_SNAPSHOT
    ))
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_triple_insert_trigger(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS trg_triples_outbox_insert
        AFTER INSERT ON triples
        BEGIN
            INSERT INTO outbox_events (event_type, payload)
            VALUES ('triple.insert', json_object(
                'id', NEW.id,
                'subject', NEW.subject,
                'predicate', NEW.predicate,
                'object', NEW.object,
                'evidence_fact_id', NEW.evidence_fact_id,
                'created_at', NEW.created_at
            ));
        END
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Filtered emission: only rows inserted as published are announced.
/// The predicate reads the NEW row, never prior state.
async fn create_participation_insert_trigger(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS trg_participation_outbox_insert
        AFTER INSERT ON source_participation
        WHEN NEW.published = 1
        BEGIN
            INSERT INTO outbox_events (event_type, payload)
            VALUES ('participation.insert', json_object(
                'id', NEW.id,
                'source_domain', NEW.source_domain,
                'corpus_id', NEW.corpus_id,
                'published', json('true'),
                'created_at', NEW.created_at
            ));
        END
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
