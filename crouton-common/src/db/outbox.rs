//! Outbox drain protocol
//!
//! Operations a drain consumer performs against `outbox_events`:
//!
//! | operation       | transition                                        |
//! |-----------------|---------------------------------------------------|
//! | `claim_batch`   | pending → processing (stamps a claim token)       |
//! | `ack`           | processing → done                                 |
//! | `nack`          | processing → failed, or → dead at max attempts    |
//! | `reclaim_stale` | processing (timed out) → failed / dead            |
//! | `retry_failed`  | failed (backoff elapsed) → pending                |
//! | `requeue`       | failed [/ dead] → pending, attempts reset         |
//!
//! SQLite has no `FOR UPDATE SKIP LOCKED`. A claim is a single
//! `UPDATE ... WHERE id IN (SELECT ... LIMIT n) RETURNING` statement, and
//! SQLite runs each write statement under the database write lock, so two
//! workers can never claim the same row. Ack and nack only apply while
//! the caller still holds the claim token, so a worker whose claim was
//! reclaimed after a timeout cannot overwrite the newer outcome.
//!
//! Delivery is at-least-once: a crash between apply and ack redelivers.

use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::models::{OutboxEvent, OutboxStatus};
use crate::api::types::{OutboxStatsResponse, RequeueRequest};
use crate::time::{now, storage_cutoff, to_storage};
use crate::Result;

const EVENT_COLUMNS: &str =
    "id, event_type, payload, occurred_at, status, attempts, error, claim_token";

/// Automatic retry and quarantine policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after which an event becomes `dead`
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl RetryPolicy {
    /// Delay before retrying an event that has failed `attempts` times
    ///
    /// `base * 2^(attempts - 1)`, capped at `backoff_max`.
    pub fn backoff(&self, attempts: i64) -> Duration {
        let exponent = attempts.saturating_sub(1).clamp(0, 31) as u32;
        self.backoff_base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }
}

/// Result of an automatic retry sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetrySweep {
    /// failed → pending
    pub requeued: u64,
    /// failed → dead (attempts already at the cap)
    pub quarantined: u64,
}

/// Claim up to `limit` pending events, oldest id first
pub async fn claim_batch(pool: &SqlitePool, limit: u32) -> Result<Vec<OutboxEvent>> {
    let token = Uuid::new_v4().to_string();
    let claimed_at = to_storage(now());

    let rows = sqlx::query(&format!(
        r#"
        UPDATE outbox_events
        SET status = 'processing', claimed_at = ?, claim_token = ?
        WHERE id IN (
            SELECT id FROM outbox_events
            WHERE status = 'pending'
            ORDER BY id
            LIMIT ?
        )
        RETURNING {columns}
        "#,
        columns = EVENT_COLUMNS
    ))
    .bind(&claimed_at)
    .bind(&token)
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    let mut events = rows
        .iter()
        .map(OutboxEvent::from_row)
        .collect::<Result<Vec<_>>>()?;

    // RETURNING order is unspecified
    events.sort_by_key(|e| e.id);

    if !events.is_empty() {
        debug!(
            count = events.len(),
            first_id = events[0].id,
            claim_token = %token,
            "Claimed outbox events"
        );
    }

    Ok(events)
}

/// Mark a claimed event as applied
///
/// Returns `false` when the caller no longer holds the claim.
pub async fn ack(pool: &SqlitePool, id: i64, claim_token: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE outbox_events
        SET status = 'done', error = NULL, last_attempt_at = ?,
            claimed_at = NULL, claim_token = NULL
        WHERE id = ? AND status = 'processing' AND claim_token = ?
        "#,
    )
    .bind(to_storage(now()))
    .bind(id)
    .bind(claim_token)
    .execute(pool)
    .await?;

    let acked = result.rows_affected() == 1;
    if !acked {
        warn!(event_id = id, "Ack ignored: claim no longer held");
    }
    Ok(acked)
}

/// Record a failed apply
///
/// Increments `attempts` and stores `error`. The event becomes `failed`,
/// or `dead` once `attempts` reaches `max_attempts`. Returns the new
/// status, or `None` when the caller no longer holds the claim.
pub async fn nack(
    pool: &SqlitePool,
    id: i64,
    claim_token: &str,
    error: &str,
    max_attempts: u32,
) -> Result<Option<OutboxStatus>> {
    let status: Option<String> = sqlx::query_scalar(
        r#"
        UPDATE outbox_events
        SET status = CASE WHEN attempts + 1 >= ? THEN 'dead' ELSE 'failed' END,
            attempts = attempts + 1,
            error = ?,
            last_attempt_at = ?,
            claimed_at = NULL,
            claim_token = NULL
        WHERE id = ? AND status = 'processing' AND claim_token = ?
        RETURNING status
        "#,
    )
    .bind(i64::from(max_attempts))
    .bind(error)
    .bind(to_storage(now()))
    .bind(id)
    .bind(claim_token)
    .fetch_optional(pool)
    .await?;

    match status {
        Some(status) => {
            let status: OutboxStatus = status.parse()?;
            if status == OutboxStatus::Dead {
                warn!(
                    event_id = id,
                    max_attempts,
                    error,
                    "Outbox event quarantined after max attempts"
                );
            }
            Ok(Some(status))
        }
        None => {
            warn!(event_id = id, "Nack ignored: claim no longer held");
            Ok(None)
        }
    }
}

/// Fail claims held longer than `timeout`
///
/// Recovers events from workers that died mid-batch. Each counts as a
/// failed attempt.
pub async fn reclaim_stale(pool: &SqlitePool, timeout: Duration, max_attempts: u32) -> Result<u64> {
    let cutoff = storage_cutoff(timeout);
    let error = format!("processing timeout after {} ms", timeout.as_millis());

    let result = sqlx::query(
        r#"
        UPDATE outbox_events
        SET status = CASE WHEN attempts + 1 >= ? THEN 'dead' ELSE 'failed' END,
            attempts = attempts + 1,
            error = ?,
            last_attempt_at = ?,
            claimed_at = NULL,
            claim_token = NULL
        WHERE status = 'processing' AND claimed_at < ?
        "#,
    )
    .bind(i64::from(max_attempts))
    .bind(&error)
    .bind(to_storage(now()))
    .bind(&cutoff)
    .execute(pool)
    .await?;

    let reclaimed = result.rows_affected();
    if reclaimed > 0 {
        warn!(reclaimed, cutoff = %cutoff, "Reclaimed stale outbox claims");
    }
    Ok(reclaimed)
}

/// Automatic requeue of failed events whose backoff has elapsed
///
/// Attempt counts are kept so the cap still applies. Failed events that
/// already reached the cap (for example after `max_attempts` was lowered)
/// are quarantined.
pub async fn retry_failed(pool: &SqlitePool, policy: &RetryPolicy) -> Result<RetrySweep> {
    let mut sweep = RetrySweep::default();
    let max_attempts = i64::from(policy.max_attempts);

    sweep.quarantined = sqlx::query(
        "UPDATE outbox_events SET status = 'dead' WHERE status = 'failed' AND attempts >= ?",
    )
    .bind(max_attempts)
    .execute(pool)
    .await?
    .rows_affected();

    let candidates: Vec<(i64, i64, Option<String>)> = sqlx::query_as(
        r#"
        SELECT id, attempts, last_attempt_at FROM outbox_events
        WHERE status = 'failed' AND attempts < ?
        ORDER BY id
        LIMIT 1000
        "#,
    )
    .bind(max_attempts)
    .fetch_all(pool)
    .await?;

    for (id, attempts, last_attempt_at) in candidates {
        let due = match last_attempt_at {
            Some(last) => last <= storage_cutoff(policy.backoff(attempts)),
            None => true,
        };
        if !due {
            continue;
        }

        // Guarded so a concurrent operator requeue is not double counted
        sweep.requeued += sqlx::query(
            "UPDATE outbox_events SET status = 'pending' WHERE id = ? AND status = 'failed'",
        )
        .bind(id)
        .execute(pool)
        .await?
        .rows_affected();
    }

    if sweep.requeued > 0 || sweep.quarantined > 0 {
        info!(
            requeued = sweep.requeued,
            quarantined = sweep.quarantined,
            "Outbox retry sweep"
        );
    }

    Ok(sweep)
}

/// Operator requeue: failed (and optionally dead) events back to pending
///
/// Resets `attempts` to 0 and clears `error`. Events in other states are
/// left untouched, including ids that do not exist.
pub async fn requeue(pool: &SqlitePool, request: &RequeueRequest) -> Result<u64> {
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        "UPDATE outbox_events SET status = 'pending', attempts = 0, error = NULL, \
         claimed_at = NULL, claim_token = NULL WHERE ",
    );

    if request.include_dead {
        builder.push("status IN ('failed', 'dead')");
    } else {
        builder.push("status = 'failed'");
    }

    if let Some(ids) = &request.ids {
        if ids.is_empty() {
            return Ok(0);
        }
        builder.push(" AND id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
    }

    let requeued = builder.build().execute(pool).await?.rows_affected();

    info!(
        requeued,
        include_dead = request.include_dead,
        selected = request.ids.as_ref().map(|ids| ids.len()),
        "Outbox events requeued by operator"
    );

    Ok(requeued)
}

/// Row counts per status plus the oldest pending id
pub async fn status_counts(pool: &SqlitePool) -> Result<OutboxStatsResponse> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM outbox_events GROUP BY status")
            .fetch_all(pool)
            .await?;

    let mut counts: BTreeMap<String, i64> = OutboxStatus::ALL
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect();
    for (status, count) in rows {
        counts.insert(status, count);
    }

    let oldest_pending_id: Option<i64> =
        sqlx::query_scalar("SELECT MIN(id) FROM outbox_events WHERE status = 'pending'")
            .fetch_one(pool)
            .await?;

    Ok(OutboxStatsResponse {
        counts,
        oldest_pending_id,
    })
}

/// Fetch a single event
pub async fn fetch_event(pool: &SqlitePool, id: i64) -> Result<Option<OutboxEvent>> {
    let row = sqlx::query(&format!(
        "SELECT {columns} FROM outbox_events WHERE id = ?",
        columns = EVENT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(OutboxEvent::from_row).transpose()
}

/// List events in a status, oldest first
pub async fn list_events(
    pool: &SqlitePool,
    status: OutboxStatus,
    limit: u32,
) -> Result<Vec<OutboxEvent>> {
    let rows = sqlx::query(&format!(
        "SELECT {columns} FROM outbox_events WHERE status = ? ORDER BY id LIMIT ?",
        columns = EVENT_COLUMNS
    ))
    .bind(status.as_str())
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    rows.iter().map(OutboxEvent::from_row).collect()
}

/// Write/event coupling audit
///
/// Every fact and triple row should have exactly one matching insert
/// event, and every insert event should point at an existing row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CouplingReport {
    pub facts_without_event: i64,
    pub triples_without_event: i64,
    pub fact_events_without_row: i64,
    pub triple_events_without_row: i64,
    pub duplicate_fact_events: i64,
    pub duplicate_triple_events: i64,
}

impl CouplingReport {
    pub fn is_consistent(&self) -> bool {
        *self == CouplingReport::default()
    }
}

/// Audit the write/event coupling across the whole store
pub async fn audit_coupling(pool: &SqlitePool) -> Result<CouplingReport> {
    let row = sqlx::query(
        r#"
        SELECT
            (SELECT COUNT(*) FROM croutons c WHERE NOT EXISTS (
                SELECT 1 FROM outbox_events e
                WHERE e.event_type = 'fact.insert'
                  AND json_extract(e.payload, '$.id') = c.id
            )) AS facts_without_event,
            (SELECT COUNT(*) FROM triples t WHERE NOT EXISTS (
                SELECT 1 FROM outbox_events e
                WHERE e.event_type = 'triple.insert'
                  AND json_extract(e.payload, '$.subject') = t.subject
                  AND json_extract(e.payload, '$.predicate') = t.predicate
                  AND json_extract(e.payload, '$.object') = t.object
            )) AS triples_without_event,
            (SELECT COUNT(*) FROM outbox_events e
                WHERE e.event_type = 'fact.insert' AND NOT EXISTS (
                    SELECT 1 FROM croutons c WHERE c.id = json_extract(e.payload, '$.id')
            )) AS fact_events_without_row,
            (SELECT COUNT(*) FROM outbox_events e
                WHERE e.event_type = 'triple.insert' AND NOT EXISTS (
                    SELECT 1 FROM triples t
                    WHERE t.subject = json_extract(e.payload, '$.subject')
                      AND t.predicate = json_extract(e.payload, '$.predicate')
                      AND t.object = json_extract(e.payload, '$.object')
            )) AS triple_events_without_row,
            (SELECT COUNT(*) FROM (
                SELECT 1 FROM outbox_events
                WHERE event_type = 'fact.insert'
                GROUP BY json_extract(payload, '$.id')
                HAVING COUNT(*) > 1
            )) AS duplicate_fact_events,
            (SELECT COUNT(*) FROM (
                SELECT 1 FROM outbox_events
                WHERE event_type = 'triple.insert'
                GROUP BY json_extract(payload, '$.subject'),
                         json_extract(payload, '$.predicate'),
                         json_extract(payload, '$.object')
                HAVING COUNT(*) > 1
            )) AS duplicate_triple_events
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(CouplingReport {
        facts_without_event: row.try_get("facts_without_event")?,
        triples_without_event: row.try_get("triples_without_event")?,
        fact_events_without_row: row.try_get("fact_events_without_row")?,
        triple_events_without_row: row.try_get("triple_events_without_row")?,
        duplicate_fact_events: row.try_get("duplicate_fact_events")?,
        duplicate_triple_events: row.try_get("duplicate_triple_events")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_millis(1000),
        };

        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(800));
        assert_eq!(policy.backoff(5), Duration::from_millis(1000));
        assert_eq!(policy.backoff(500), Duration::from_millis(1000));
    }

    #[test]
    fn test_clean_report_is_consistent() {
        assert!(CouplingReport::default().is_consistent());
        let broken = CouplingReport {
            triples_without_event: 1,
            ..Default::default()
        };
        assert!(!broken.is_consistent());
    }
}
