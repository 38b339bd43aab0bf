//! Timestamp utilities
//!
//! All timestamps are stored as RFC 3339 UTC strings with millisecond
//! precision and a `Z` suffix, matching SQLite's
//! `strftime('%Y-%m-%dT%H:%M:%fZ', 'now')`. The fixed width keeps string
//! comparison equivalent to time comparison.

use chrono::{DateTime, SecondsFormat, Utc};
use std::time::Duration;

/// SQL expression producing the current timestamp in storage format
pub const SQL_NOW: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp in storage format
pub fn to_storage(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Storage-format timestamp for `now - age`
pub fn storage_cutoff(age: Duration) -> String {
    let age = chrono::Duration::from_std(age).unwrap_or(chrono::Duration::MAX);
    let cutoff = now().checked_sub_signed(age).unwrap_or(DateTime::<Utc>::MIN_UTC);
    to_storage(cutoff)
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> Duration {
    Duration::from_millis(millis)
}
