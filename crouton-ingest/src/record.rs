//! NDJSON record parsing and validation
//!
//! Each non-blank line of a batch is one JSON object. Parsing never
//! touches the store; it turns raw lines into validated records with
//! their content hash already computed.

use crouton_common::content_hash::content_hash;
use crouton_common::db::EmbeddedTriple;
use serde::Deserialize;

use crate::error::IngestError;

/// Wire shape of one record; unknown fields are ignored
#[derive(Debug, Deserialize)]
struct RawRecord {
    source_url: Option<String>,
    text: Option<String>,
    natural_id: Option<String>,
    corpus_id: Option<String>,
    triple: Option<RawTriple>,
    confidence: Option<f64>,
    verified_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTriple {
    subject: Option<String>,
    predicate: Option<String>,
    object: Option<String>,
}

impl RawTriple {
    /// Complete triples only; anything partial counts as no triple
    fn complete(self) -> Option<EmbeddedTriple> {
        match (non_blank(self.subject), non_blank(self.predicate), non_blank(self.object)) {
            (Some(subject), Some(predicate), Some(object)) => Some(EmbeddedTriple {
                subject,
                predicate,
                object,
            }),
            _ => None,
        }
    }
}

/// A validated record ready to persist
#[derive(Debug, Clone, PartialEq)]
pub struct FactRecord {
    /// 1-based physical line in the request body
    pub line: usize,
    pub source_url: String,
    pub text: String,
    pub natural_id: Option<String>,
    pub corpus_id: Option<String>,
    pub triple: Option<EmbeddedTriple>,
    pub confidence: Option<f64>,
    pub verified_at: Option<String>,
    pub content_hash: String,
}

/// Parse one line
///
/// `line` is only used for error reporting.
pub fn parse_line(bytes: &[u8], line: usize, max_line_bytes: usize) -> Result<FactRecord, IngestError> {
    if bytes.len() > max_line_bytes {
        return Err(IngestError::LineTooLarge {
            line,
            size: bytes.len(),
            limit: max_line_bytes,
        });
    }

    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| IngestError::MalformedJsonLine {
            line,
            message: format!("invalid JSON: {}", e),
        })?;

    if !value.is_object() {
        return Err(IngestError::MalformedJsonLine {
            line,
            message: "record must be a JSON object".to_string(),
        });
    }

    let raw: RawRecord =
        serde_json::from_value(value).map_err(|e| IngestError::MalformedJsonLine {
            line,
            message: format!("invalid record: {}", e),
        })?;

    let source_url = non_blank(raw.source_url).ok_or(IngestError::MissingRequiredField {
        line,
        field: "source_url",
    })?;
    let text = non_blank(raw.text).ok_or(IngestError::MissingRequiredField { line, field: "text" })?;
    let triple = raw.triple.and_then(RawTriple::complete);
    let content_hash = content_hash(&source_url, &text, triple.as_ref());

    Ok(FactRecord {
        line,
        source_url,
        text,
        natural_id: non_blank(raw.natural_id),
        corpus_id: raw.corpus_id,
        triple,
        confidence: raw.confidence,
        verified_at: raw.verified_at,
        content_hash,
    })
}

/// Split a body into `(line_number, bytes)` pairs, skipping blank lines
///
/// A trailing `\r` is stripped so CRLF bodies parse.
pub fn split_lines(body: &[u8]) -> impl Iterator<Item = (usize, &[u8])> {
    body.split(|b| *b == b'\n')
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.strip_suffix(b"\r").unwrap_or(line)))
        .filter(|(_, line)| !line.iter().all(u8::is_ascii_whitespace))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
