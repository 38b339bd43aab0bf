//! Ingestion Coordinator
//!
//! Turns one verified NDJSON body into one database transaction:
//!
//! 1. Split into lines and parse each record (no store access)
//! 2. Insert each fact if its content hash is new, otherwise count it
//!    as skipped
//! 3. Insert each complete embedded triple if its (subject, predicate,
//!    object) is new
//! 4. Commit. The capture triggers have appended the outbox rows inside
//!    the same transaction.
//!
//! Lock contention rolls the whole transaction back and retries it from
//! scratch; any other store error rolls back and is reported as a
//! persistence failure.

use crouton_common::api::{IngestResponse, RejectedLine};
use crouton_common::config::{BatchPolicy, IngestConfig};
use crouton_common::db::retry_on_lock;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::db::facts;
use crate::error::{IngestError, IngestResult};
use crate::record::{parse_line, split_lines, FactRecord};

/// How an existing `natural_id` is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpsertMode {
    /// Natural-id conflicts are deduplicated like hash conflicts
    #[default]
    Off,
    /// A record whose natural id exists with different content rewrites
    /// that row
    NaturalId,
}

/// Per-batch options
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub policy: BatchPolicy,
    pub max_line_bytes: usize,
    pub max_lock_wait_ms: u64,
    pub upsert: UpsertMode,
}

impl BatchOptions {
    pub fn from_config(config: &IngestConfig, upsert: UpsertMode) -> Self {
        Self {
            policy: config.batch_policy,
            max_line_bytes: config.max_line_bytes,
            max_lock_wait_ms: config.max_lock_wait_ms,
            upsert,
        }
    }
}

/// Outcome counts of one committed transaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct WriteCounts {
    accepted: u64,
    skipped: u64,
    updated: u64,
}

/// Parsed batch
#[derive(Debug, Default)]
struct ParsedBatch {
    records: Vec<FactRecord>,
    rejected: Vec<RejectedLine>,
    lines: usize,
}

/// Ingest one NDJSON body
///
/// The signature must already have been checked over the same bytes.
pub async fn ingest_batch(
    pool: &SqlitePool,
    body: &[u8],
    options: &BatchOptions,
) -> IngestResult<IngestResponse> {
    if body.is_empty() {
        return Err(IngestError::EmptyBody);
    }

    let batch = parse_batch(body, options)?;
    if batch.lines == 0 {
        return Err(IngestError::NoLines);
    }

    let counts = if batch.records.is_empty() {
        WriteCounts::default()
    } else {
        retry_on_lock("ingest batch", options.max_lock_wait_ms, || {
            write_batch(pool, &batch.records, options.upsert)
        })
        .await?
    };

    let response = IngestResponse {
        accepted: counts.accepted,
        skipped: counts.skipped,
        updated: counts.updated,
        total: batch.records.len() as u64,
        rejected: match options.policy {
            BatchPolicy::Strict => None,
            BatchPolicy::Lenient => Some(batch.rejected),
        },
    };

    info!(
        accepted = response.accepted,
        skipped = response.skipped,
        updated = response.updated,
        total = response.total,
        rejected = response.rejected.as_ref().map_or(0, |r| r.len()),
        "Batch committed"
    );

    Ok(response)
}

fn parse_batch(body: &[u8], options: &BatchOptions) -> IngestResult<ParsedBatch> {
    let mut batch = ParsedBatch::default();

    for (line, bytes) in split_lines(body) {
        batch.lines += 1;
        match parse_line(bytes, line, options.max_line_bytes) {
            Ok(record) => batch.records.push(record),
            Err(err) => match options.policy {
                BatchPolicy::Strict => return Err(err),
                BatchPolicy::Lenient => batch.rejected.push(RejectedLine {
                    line,
                    error: err.code().to_string(),
                    message: err.to_string(),
                }),
            },
        }
    }

    Ok(batch)
}

async fn write_batch(
    pool: &SqlitePool,
    records: &[FactRecord],
    upsert: UpsertMode,
) -> crouton_common::Result<WriteCounts> {
    let mut tx = pool.begin().await?;
    let mut counts = WriteCounts::default();

    for record in records {
        let id = Uuid::new_v4().to_string();

        let evidence_fact_id = if facts::insert_fact(&mut tx, &id, record).await? {
            counts.accepted += 1;
            Some(id)
        } else if let Some(updated_id) = try_upsert(&mut tx, record, upsert).await? {
            counts.updated += 1;
            Some(updated_id)
        } else {
            counts.skipped += 1;
            // A natural-id conflict discards the record, triple included
            facts::fact_id_by_hash(&mut tx, &record.content_hash).await?
        };

        if let (Some(triple), Some(evidence_fact_id)) = (&record.triple, &evidence_fact_id) {
            facts::insert_triple(&mut tx, triple, Some(evidence_fact_id.as_str())).await?;
        }
    }

    // Dropping `tx` on an earlier `?` rolls back
    tx.commit().await?;

    Ok(counts)
}

/// Rewrite the natural-id row when upserting and the content changed
///
/// Returns the rewritten row's id, or `None` when the record is a plain
/// duplicate or its new hash already belongs to another row.
async fn try_upsert(
    conn: &mut sqlx::SqliteConnection,
    record: &FactRecord,
    upsert: UpsertMode,
) -> crouton_common::Result<Option<String>> {
    let natural_id = match (upsert, &record.natural_id) {
        (UpsertMode::NaturalId, Some(natural_id)) => natural_id,
        _ => return Ok(None),
    };

    let existing = match facts::fact_by_natural_id(&mut *conn, natural_id).await? {
        Some(existing) => existing,
        None => return Ok(None),
    };

    if existing.content_hash.as_deref() == Some(record.content_hash.as_str()) {
        return Ok(None);
    }

    if facts::fact_id_by_hash(&mut *conn, &record.content_hash).await?.is_some() {
        return Ok(None);
    }

    facts::update_fact(&mut *conn, &existing.id, record).await?;
    Ok(Some(existing.id))
}
