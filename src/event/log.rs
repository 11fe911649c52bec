//! ActivityLog - capacity-bounded, append-only activity trail
//!
//! - `ActivityEvent`: envelope with id + timestamp + kind + correlation ids
//! - `ActivityKind`: workflow lifecycle, step lifecycle, manual entries
//! - `ActivityLog`: thread-safe ring buffer, optionally mirrored to NDJSON
//!
//! Recording never fails: a broken sink is logged and ignored.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::sink::NdjsonSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    // ═══════════════════════════════════════════
    // WORKFLOW LEVEL
    // ═══════════════════════════════════════════
    WorkflowCreated,
    WorkflowUpdated,
    WorkflowDeleted,
    WorkflowDuplicated,
    WorkflowStarted,
    WorkflowResumed,
    WorkflowPaused,
    WorkflowStopped,
    WorkflowCompleted,
    WorkflowFailed,

    // ═══════════════════════════════════════════
    // STEP LEVEL
    // ═══════════════════════════════════════════
    StepStarted,
    StepSucceeded,
    StepFailed,

    /// Operator-supplied entry
    Manual,
}

impl ActivityKind {
    pub fn default_severity(&self) -> Severity {
        match self {
            Self::WorkflowCompleted | Self::StepSucceeded => Severity::Success,
            Self::WorkflowStopped | Self::StepFailed => Severity::Warning,
            Self::WorkflowFailed => Severity::Error,
            _ => Severity::Info,
        }
    }

    pub fn is_step_event(&self) -> bool {
        matches!(self, Self::StepStarted | Self::StepSucceeded | Self::StepFailed)
    }
}

/// Single recorded activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    /// Monotonic sequence ID
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: ActivityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<u32>,
    pub severity: Severity,
    pub message: String,
}

/// Input for `ActivityLog::record`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub kind: ActivityKind,
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub step_index: Option<usize>,
    #[serde(default)]
    pub session_id: Option<u32>,
    #[serde(default)]
    pub severity: Option<Severity>,
    pub message: String,
}

impl ActivityEntry {
    pub fn new(kind: ActivityKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            workflow_id: None,
            step_index: None,
            session_id: None,
            severity: None,
            message: message.into(),
        }
    }

    pub fn manual(message: impl Into<String>) -> Self {
        Self::new(ActivityKind::Manual, message)
    }

    pub fn workflow(mut self, id: impl Into<String>) -> Self {
        self.workflow_id = Some(id.into());
        self
    }

    pub fn step(mut self, index: usize) -> Self {
        self.step_index = Some(index);
        self
    }

    pub fn session(mut self, session: Option<u32>) -> Self {
        self.session_id = session;
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }
}

/// Filter for `tail`; `None` fields match anything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivityFilter {
    pub workflow_id: Option<String>,
    pub kind: Option<ActivityKind>,
    pub severity: Option<Severity>,
    pub session_id: Option<u32>,
}

impl ActivityFilter {
    pub fn workflow(id: impl Into<String>) -> Self {
        Self {
            workflow_id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, event: &ActivityEvent) -> bool {
        self.workflow_id
            .as_deref()
            .map_or(true, |id| event.workflow_id.as_deref() == Some(id))
            && self.kind.map_or(true, |k| event.kind == k)
            && self.severity.map_or(true, |s| event.severity == s)
            && self.session_id.map_or(true, |s| event.session_id == Some(s))
    }
}

/// Thread-safe activity log (clones share the same buffer)
#[derive(Clone)]
pub struct ActivityLog {
    events: Arc<RwLock<VecDeque<ActivityEvent>>>,
    next_id: Arc<AtomicU64>,
    capacity: usize,
    sink: Option<Arc<NdjsonSink>>,
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Arc::new(RwLock::new(VecDeque::with_capacity(capacity.min(1024)))),
            next_id: Arc::new(AtomicU64::new(0)),
            capacity: capacity.max(1),
            sink: None,
        }
    }

    /// Reload the newest `capacity` entries from an NDJSON file, compact the
    /// file down to them and keep appending to it
    pub fn restore(path: &Path, capacity: usize) -> Result<Self> {
        let log = Self::new(capacity);
        let history = super::sink::read_tail(path, log.capacity)?;
        if path.exists() {
            super::sink::compact(path, &history)?;
        }
        let next_id = history.last().map_or(0, |e| e.id + 1);
        log.next_id.store(next_id, Ordering::SeqCst);
        log.events.write().extend(history);
        Ok(Self {
            sink: Some(Arc::new(NdjsonSink::open(path)?)),
            ..log
        })
    }

    /// Append an entry; returns its id
    pub fn record(&self, entry: ActivityEntry) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event = ActivityEvent {
            id,
            timestamp: Utc::now(),
            severity: entry.severity.unwrap_or_else(|| entry.kind.default_severity()),
            kind: entry.kind,
            workflow_id: entry.workflow_id,
            step_index: entry.step_index,
            session_id: entry.session_id,
            message: entry.message,
        };
        mirror_to_tracing(&event);

        // one short buffered line; the sink has its own lock
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.append(&event) {
                tracing::debug!(error = %e, "Activity sink write failed");
            }
        }

        let mut events = self.events.write();
        events.push_back(event);
        while events.len() > self.capacity {
            events.pop_front();
        }
        id
    }

    /// Most recent `limit` matching entries, newest first
    pub fn tail(&self, limit: usize, filter: &ActivityFilter) -> Vec<ActivityEvent> {
        self.events
            .read()
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Access entries (oldest first) without cloning
    pub fn with_events<T>(&self, f: impl FnOnce(&VecDeque<ActivityEvent>) -> T) -> T {
        f(&self.events.read())
    }

    /// Drop every entry, including the persisted ones
    pub fn clear(&self) {
        let mut events = self.events.write();
        events.clear();
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.truncate() {
                tracing::debug!(error = %e, "Activity sink truncate failed");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(crate::util::ACTIVITY_CAPACITY)
    }
}

impl std::fmt::Debug for ActivityLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityLog")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("persistent", &self.sink.is_some())
            .finish()
    }
}

fn mirror_to_tracing(event: &ActivityEvent) {
    let workflow_id = event.workflow_id.as_deref().unwrap_or("-");
    match event.severity {
        Severity::Error => tracing::error!(kind = ?event.kind, workflow_id, step = ?event.step_index, "{}", event.message),
        Severity::Warning => tracing::warn!(kind = ?event.kind, workflow_id, step = ?event.step_index, "{}", event.message),
        Severity::Info | Severity::Success => tracing::info!(kind = ?event.kind, workflow_id, step = ?event.step_index, "{}", event.message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    // ═══════════════════════════════════════════
    // RECORD / TAIL
    // ═══════════════════════════════════════════

    #[test]
    fn ids_are_monotonic_and_tail_is_newest_first() {
        let log = ActivityLog::new(10);
        let a = log.record(ActivityEntry::manual("first"));
        let b = log.record(ActivityEntry::manual("second"));
        assert!(b > a);

        let tail = log.tail(10, &ActivityFilter::default());
        let messages: Vec<_> = tail.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, ["second", "first"]);
    }

    #[test]
    fn capacity_drops_oldest() {
        let log = ActivityLog::new(3);
        for i in 0..5 {
            log.record(ActivityEntry::manual(format!("entry {}", i)));
        }
        assert_eq!(log.len(), 3);
        let tail = log.tail(10, &ActivityFilter::default());
        assert_eq!(tail.last().unwrap().message, "entry 2");
        assert_eq!(tail[0].message, "entry 4");
    }

    #[test]
    fn filter_by_workflow_kind_and_session() {
        let log = ActivityLog::new(100);
        log.record(ActivityEntry::new(ActivityKind::WorkflowStarted, "go").workflow("wf-a"));
        log.record(
            ActivityEntry::new(ActivityKind::StepFailed, "boom")
                .workflow("wf-a")
                .step(1)
                .session(Some(3)),
        );
        log.record(ActivityEntry::new(ActivityKind::WorkflowStarted, "go").workflow("wf-b"));

        assert_eq!(log.tail(10, &ActivityFilter::workflow("wf-a")).len(), 2);

        let failed = ActivityFilter {
            kind: Some(ActivityKind::StepFailed),
            ..Default::default()
        };
        let hits = log.tail(10, &failed);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].severity, Severity::Warning);
        assert_eq!(hits[0].step_index, Some(1));

        let session = ActivityFilter {
            session_id: Some(3),
            ..Default::default()
        };
        assert_eq!(log.tail(10, &session).len(), 1);
        assert_eq!(log.tail(1, &ActivityFilter::default())[0].workflow_id.as_deref(), Some("wf-b"));
    }

    #[test]
    fn explicit_severity_wins() {
        let log = ActivityLog::new(10);
        log.record(ActivityEntry::manual("heads up").severity(Severity::Warning));
        assert_eq!(log.tail(1, &ActivityFilter::default())[0].severity, Severity::Warning);
    }

    #[test]
    fn clear_empties_but_keeps_ids_moving() {
        let log = ActivityLog::new(10);
        let first = log.record(ActivityEntry::manual("x"));
        log.clear();
        assert!(log.is_empty());
        let next = log.record(ActivityEntry::manual("y"));
        assert!(next > first);
    }

    #[test]
    fn clones_share_buffer() {
        let log = ActivityLog::new(10);
        let clone = log.clone();
        clone.record(ActivityEntry::manual("shared"));
        assert_eq!(log.len(), 1);
    }

    // ═══════════════════════════════════════════
    // PERSISTENCE
    // ═══════════════════════════════════════════

    #[test]
    fn restore_reloads_history_and_continues_ids() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("activity.ndjson");

        let log = ActivityLog::restore(&path, 2).unwrap();
        log.record(ActivityEntry::manual("one"));
        log.record(ActivityEntry::manual("two"));
        log.record(ActivityEntry::manual("three"));
        drop(log);

        let reopened = ActivityLog::restore(&path, 2).unwrap();
        let tail = reopened.tail(10, &ActivityFilter::default());
        let messages: Vec<_> = tail.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, ["three", "two"]);

        let id = reopened.record(ActivityEntry::manual("four"));
        assert_eq!(id, 3);
    }

    #[test]
    fn clear_survives_restart() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("activity.ndjson");

        let log = ActivityLog::restore(&path, 10).unwrap();
        log.record(ActivityEntry::manual("before clear"));
        log.clear();
        drop(log);

        let reopened = ActivityLog::restore(&path, 10).unwrap();
        assert!(reopened.is_empty());
        reopened.record(ActivityEntry::manual("after clear"));
        drop(reopened);

        let again = ActivityLog::restore(&path, 10).unwrap();
        let tail = again.tail(10, &ActivityFilter::default());
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].message, "after clear");
    }

    #[test]
    fn restore_compacts_file_to_capacity() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("activity.ndjson");

        let log = ActivityLog::restore(&path, 100).unwrap();
        for i in 0..20 {
            log.record(ActivityEntry::manual(format!("entry {}", i)));
        }
        drop(log);

        let reopened = ActivityLog::restore(&path, 5).unwrap();
        assert_eq!(reopened.len(), 5);
        let on_disk = std::fs::read_to_string(&path).unwrap();
        assert_eq!(on_disk.lines().count(), 5);
        assert_eq!(reopened.record(ActivityEntry::manual("next")), 20);
    }
}
