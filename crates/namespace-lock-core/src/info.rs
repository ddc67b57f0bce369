//! Instrumentation types: per-request entries and the snapshots built from them.

use std::fmt;
use std::time::{Duration, SystemTime};

use tokio::time::Instant;

use crate::key::{LockMode, ResourceKey};

/// Whether a request is still waiting or holds the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockStatus {
    Blocked,
    Acquired,
}

impl fmt::Display for LockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockStatus::Blocked => f.write_str("blocked"),
            LockStatus::Acquired => f.write_str("acquired"),
        }
    }
}

/// One caller's in-flight or held request on a resource.
#[derive(Debug, Clone)]
pub struct LockEntry {
    pub operation_id: String,
    pub mode: LockMode,
    pub status: LockStatus,
    /// Wall-clock time the request started waiting.
    pub since: SystemTime,
    /// Monotonic counterpart of `since`, used for age filtering.
    pub started: Instant,
    /// Caller identity, usually the `file:line` that created the handle.
    pub source: String,
}

impl LockEntry {
    pub fn blocked(operation_id: impl Into<String>, mode: LockMode, source: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            mode,
            status: LockStatus::Blocked,
            since: SystemTime::now(),
            started: Instant::now(),
            source: source.into(),
        }
    }

    /// Time elapsed since the request was made.
    pub fn age(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Point-in-time description of one lock entry, as returned by `list_locks`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    pub volume: String,
    pub path: String,
    pub operation_id: String,
    pub mode: LockMode,
    pub status: LockStatus,
    pub since: SystemTime,
    /// Age of the entry when the snapshot was taken.
    pub duration: Duration,
    pub source: String,
}

impl LockInfo {
    pub(crate) fn from_entry(key: &ResourceKey, entry: &LockEntry) -> Self {
        Self {
            volume: key.volume().to_string(),
            path: key.path().to_string(),
            operation_id: entry.operation_id.clone(),
            mode: entry.mode,
            status: entry.status,
            since: entry.since,
            duration: entry.age(),
            source: entry.source.clone(),
        }
    }
}

impl fmt::Display for LockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} ({} {}, op: {}, for {:?}, source: {})",
            self.volume, self.path, self.mode, self.status, self.operation_id, self.duration, self.source
        )
    }
}

/// Aggregate counts over the whole lock state table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockSummary {
    /// Entries in any state.
    pub total_locks: usize,
    pub total_blocked: usize,
    pub total_acquired: usize,
    /// Resources with a live lock record.
    pub resources: usize,
}
