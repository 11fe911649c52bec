//! Event Module - activity trail for workflows and steps
//!
//! Key types:
//! - `ActivityEvent`: envelope with id + timestamp + kind + correlation ids
//! - `ActivityKind` / `Severity`: what happened and how it went
//! - `ActivityLog`: thread-safe, capacity-bounded log
//! - `NdjsonSink`: NDJSON file the log is mirrored to

mod log;
mod sink;

// Re-export all public types
pub use log::{ActivityEntry, ActivityEvent, ActivityFilter, ActivityKind, ActivityLog, Severity};
pub use sink::{read_tail, NdjsonSink};
