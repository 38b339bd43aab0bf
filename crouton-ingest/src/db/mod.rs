//! Fact and triple writes used by the ingestion coordinator
//!
//! Every function runs on a connection borrowed from the caller's open
//! transaction. None of them writes to `outbox_events`: the capture
//! triggers do that as part of the same statement.

pub mod facts;
