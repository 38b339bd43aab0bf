//! Fact and triple queries

use crouton_common::db::{EmbeddedTriple, Fact, Triple};
use crouton_common::time::SQL_NOW;
use crouton_common::{Error, Result};
use sqlx::{SqliteConnection, SqlitePool};

use crate::record::FactRecord;

/// Existing fact addressed by `natural_id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NaturalIdMatch {
    pub id: String,
    pub content_hash: Option<String>,
}

/// Insert a fact unless any unique key (id, content hash, natural id)
/// already exists
///
/// Returns `true` when the row was inserted.
pub async fn insert_fact(conn: &mut SqliteConnection, id: &str, record: &FactRecord) -> Result<bool> {
    let triple_json = triple_json(record.triple.as_ref())?;

    let result = sqlx::query(
        r#"
        INSERT INTO croutons
            (id, natural_id, source_url, content_hash, corpus_id, text, triple, confidence, verified_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(id)
    .bind(&record.natural_id)
    .bind(&record.source_url)
    .bind(&record.content_hash)
    .bind(&record.corpus_id)
    .bind(&record.text)
    .bind(triple_json)
    .bind(record.confidence)
    .bind(&record.verified_at)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Id of the fact holding `content_hash`
pub async fn fact_id_by_hash(conn: &mut SqliteConnection, content_hash: &str) -> Result<Option<String>> {
    let id = sqlx::query_scalar("SELECT id FROM croutons WHERE content_hash = ?")
        .bind(content_hash)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(id)
}

pub async fn fact_by_natural_id(
    conn: &mut SqliteConnection,
    natural_id: &str,
) -> Result<Option<NaturalIdMatch>> {
    let row: Option<(String, Option<String>)> =
        sqlx::query_as("SELECT id, content_hash FROM croutons WHERE natural_id = ?")
            .bind(natural_id)
            .fetch_optional(&mut *conn)
            .await?;

    Ok(row.map(|(id, content_hash)| NaturalIdMatch { id, content_hash }))
}

/// Rewrite a fact's content in place
///
/// A changed `content_hash` fires the `fact.update` capture trigger.
pub async fn update_fact(conn: &mut SqliteConnection, id: &str, record: &FactRecord) -> Result<()> {
    let triple_json = triple_json(record.triple.as_ref())?;

    sqlx::query(&format!(
        r#"
        UPDATE croutons
        SET source_url = ?, content_hash = ?, corpus_id = ?, text = ?, triple = ?,
            confidence = ?, verified_at = ?, updated_at = {now}
        WHERE id = ?
        "#,
        now = SQL_NOW
    ))
    .bind(&record.source_url)
    .bind(&record.content_hash)
    .bind(&record.corpus_id)
    .bind(&record.text)
    .bind(triple_json)
    .bind(record.confidence)
    .bind(&record.verified_at)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Insert a triple unless (subject, predicate, object) exists
///
/// First writer wins: an existing row keeps its `evidence_fact_id`.
pub async fn insert_triple(
    conn: &mut SqliteConnection,
    triple: &EmbeddedTriple,
    evidence_fact_id: Option<&str>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO triples (subject, predicate, object, evidence_fact_id)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (subject, predicate, object) DO NOTHING
        "#,
    )
    .bind(&triple.subject)
    .bind(&triple.predicate)
    .bind(&triple.object)
    .bind(evidence_fact_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Load a fact by content hash
pub async fn get_fact_by_hash(pool: &SqlitePool, content_hash: &str) -> Result<Option<Fact>> {
    let row = sqlx::query("SELECT * FROM croutons WHERE content_hash = ?")
        .bind(content_hash)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(Fact::from_row).transpose()
}

/// Load a triple by its natural key
pub async fn get_triple(pool: &SqlitePool, triple: &EmbeddedTriple) -> Result<Option<Triple>> {
    let row = sqlx::query(
        "SELECT * FROM triples WHERE subject = ? AND predicate = ? AND object = ?",
    )
    .bind(&triple.subject)
    .bind(&triple.predicate)
    .bind(&triple.object)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(Triple::from_row).transpose()
}

fn triple_json(triple: Option<&EmbeddedTriple>) -> Result<Option<String>> {
    triple
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| Error::Internal(format!("Serialize triple failed: {}", e)))
}
