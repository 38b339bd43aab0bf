//! Content-addressed identity for facts
//!
//! A fact's identity is the SHA-256 of a fixed, ordered projection of its
//! semantic fields:
//!
//! ```text
//! ["crouton/v1", source_url, text, [subject, predicate, object] | null]
//! ```
//!
//! encoded as compact JSON. Provenance metadata (`corpus_id`,
//! `confidence`, `verified_at`, `natural_id`) is deliberately outside the
//! projection: re-verifying a fact or moving it between corpora is not a
//! new fact. The version tag must change if the projection ever does.

use serde_json::json;
use sha2::{Digest, Sha256};

use crate::db::models::EmbeddedTriple;

/// Version tag folded into every hash
pub const HASH_VERSION: &str = "crouton/v1";

/// Canonical content hash (64 lowercase hex characters)
pub fn content_hash(source_url: &str, text: &str, triple: Option<&EmbeddedTriple>) -> String {
    let triple = triple.map(|t| json!([t.subject, t.predicate, t.object]));
    let projection = json!([HASH_VERSION, source_url, text, triple]);

    let digest = Sha256::digest(projection.to_string().as_bytes());
    format!("{:x}", digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triple(s: &str, p: &str, o: &str) -> EmbeddedTriple {
        EmbeddedTriple {
            subject: s.to_string(),
            predicate: p.to_string(),
            object: o.to_string(),
        }
    }

    #[test]
    fn test_hash_is_stable_hex() {
        let h1 = content_hash("https://x/a", "t1", None);
        let h2 = content_hash("https://x/a", "t1", None);
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_hash_matches_documented_projection() {
        let expected = format!(
            "{:x}",
            Sha256::digest(br#"["crouton/v1","https://x/a","t1",null]"#)
        );
        assert_eq!(content_hash("https://x/a", "t1", None), expected);
    }

    #[test]
    fn test_each_semantic_field_changes_hash() {
        let base = content_hash("https://x/a", "t1", None);
        assert_ne!(base, content_hash("https://x/b", "t1", None));
        assert_ne!(base, content_hash("https://x/a", "t2", None));
        assert_ne!(
            base,
            content_hash("https://x/a", "t1", Some(&triple("A", "offers", "B")))
        );
    }

    #[test]
    fn test_triple_order_matters() {
        let forward = content_hash("u", "t", Some(&triple("A", "offers", "B")));
        let reverse = content_hash("u", "t", Some(&triple("B", "offers", "A")));
        assert_ne!(forward, reverse);
    }

    #[test]
    fn test_field_boundaries_are_unambiguous() {
        // Concatenation-based hashing would collide here
        assert_ne!(content_hash("ab", "c", None), content_hash("a", "bc", None));
    }
}
