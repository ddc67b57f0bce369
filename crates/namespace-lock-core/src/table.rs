//! The lock state table shared by every backend.
//!
//! One record per referenced resource key holds the reader count, the
//! writer flag, the number of queued writers, a reference count and the
//! per-request entries used for instrumentation. Records are created on
//! first reference and evicted as soon as their reference count drops to
//! zero. All mutation happens under one short-held mutex; callers wait on
//! the record's [`Notify`] outside of it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::warn;

use crate::error::{LockError, LockResult};
use crate::info::{LockEntry, LockInfo, LockStatus, LockSummary};
use crate::key::{LockMode, ResourceKey};

#[derive(Debug)]
struct LockRecord {
    readers: usize,
    writer_held: bool,
    waiting_writers: usize,
    ref_count: usize,
    entries: Vec<LockEntry>,
    wakeup: Arc<Notify>,
}

impl LockRecord {
    fn new() -> Self {
        Self {
            readers: 0,
            writer_held: false,
            waiting_writers: 0,
            ref_count: 0,
            entries: Vec::new(),
            wakeup: Arc::new(Notify::new()),
        }
    }

    fn position(&self, operation_id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.operation_id == operation_id)
    }

    fn admits(&self, idx: usize) -> bool {
        match self.entries[idx].mode {
            LockMode::Read => !self.writer_held && self.waiting_writers == 0,
            LockMode::Write => !self.writer_held && self.readers == 0,
        }
    }

    fn mark_acquired(&mut self, idx: usize) {
        let entry = &mut self.entries[idx];
        match entry.mode {
            LockMode::Read => self.readers += 1,
            LockMode::Write => {
                self.writer_held = true;
                self.waiting_writers = self.waiting_writers.saturating_sub(1);
            }
        }
        entry.status = LockStatus::Acquired;
    }
}

/// Copy of one record's counters, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordState {
    pub readers: usize,
    pub writer_held: bool,
    pub waiting_writers: usize,
    pub ref_count: usize,
    pub entries: usize,
}

/// Map from resource key to lock record.
#[derive(Debug, Default)]
pub struct LockStateTable {
    records: Mutex<HashMap<ResourceKey, LockRecord>>,
}

impl LockStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    // Nothing panics while the guard is held, so a poisoned mutex still
    // protects consistent data.
    fn records(&self) -> MutexGuard<'_, HashMap<ResourceKey, LockRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a blocked entry for a new request and takes a reference on the
    /// record, creating it if needed.
    ///
    /// Returns the record's wake-up signal. Waiters must enable a
    /// `notified()` future before each [`try_grant`](Self::try_grant) call so
    /// that a release in between is never missed.
    pub fn register(&self, key: &ResourceKey, entry: LockEntry) -> LockResult<Arc<Notify>> {
        let mut records = self.records();

        if let Some(record) = records.get(key)
            && record.position(&entry.operation_id).is_some()
        {
            return Err(LockError::InvariantViolation(format!(
                "operation {} is already registered on {}",
                entry.operation_id, key
            )));
        }

        let record = records.entry(key.clone()).or_insert_with(LockRecord::new);
        if entry.mode == LockMode::Write {
            record.waiting_writers += 1;
        }
        record.ref_count += 1;
        record.entries.push(entry);
        Ok(record.wakeup.clone())
    }

    /// Grants a blocked request if the write-preferring policy allows it.
    ///
    /// A reader is admitted only when no writer holds the lock and no writer
    /// is queued. A writer is admitted when there are no readers and no
    /// other writer.
    pub fn try_grant(&self, key: &ResourceKey, operation_id: &str) -> LockResult<bool> {
        let mut records = self.records();
        let record = records
            .get_mut(key)
            .ok_or_else(|| unknown_operation(key, operation_id))?;
        let idx = blocked_position(record, key, operation_id)?;

        let grantable = record.admits(idx);
        if grantable {
            record.mark_acquired(idx);
        }
        Ok(grantable)
    }

    /// Whether the write-preferring policy would grant a blocked request
    /// right now, without granting it.
    ///
    /// Backends that decide grants elsewhere check this before asking, so
    /// a queued writer is not overtaken by a later reader.
    pub fn admits(&self, key: &ResourceKey, operation_id: &str) -> LockResult<bool> {
        let records = self.records();
        let record = records
            .get(key)
            .ok_or_else(|| unknown_operation(key, operation_id))?;
        let idx = blocked_position(record, key, operation_id)?;
        Ok(record.admits(idx))
    }

    /// Records a grant decided elsewhere (e.g. by a peer quorum).
    ///
    /// Queued writers are not considered here; the decision was already
    /// made by the caller. A grant that would break mutual exclusion in the
    /// local bookkeeping is refused.
    pub fn grant(&self, key: &ResourceKey, operation_id: &str) -> LockResult<()> {
        let mut records = self.records();
        let record = records
            .get_mut(key)
            .ok_or_else(|| unknown_operation(key, operation_id))?;
        let idx = blocked_position(record, key, operation_id)?;

        let compatible = match record.entries[idx].mode {
            LockMode::Read => !record.writer_held,
            LockMode::Write => !record.writer_held && record.readers == 0,
        };
        if !compatible {
            return Err(LockError::InvariantViolation(format!(
                "{} grant for operation {} on {} conflicts with {} readers, writer held: {}",
                record.entries[idx].mode, operation_id, key, record.readers, record.writer_held
            )));
        }
        record.mark_acquired(idx);
        Ok(())
    }

    /// Removes an acquired entry and drops its reference.
    pub fn release(&self, key: &ResourceKey, operation_id: &str) -> LockResult<LockMode> {
        self.finish(key, operation_id, LockStatus::Acquired)
    }

    /// Removes a blocked entry (timed out or cancelled) and drops its reference.
    pub fn retract(&self, key: &ResourceKey, operation_id: &str) -> LockResult<()> {
        self.finish(key, operation_id, LockStatus::Blocked).map(|_| ())
    }

    fn finish(
        &self,
        key: &ResourceKey,
        operation_id: &str,
        expected: LockStatus,
    ) -> LockResult<LockMode> {
        let (wakeup, mode) = {
            let mut records = self.records();
            let record = records
                .get_mut(key)
                .ok_or_else(|| unknown_operation(key, operation_id))?;
            let idx = record
                .position(operation_id)
                .ok_or_else(|| unknown_operation(key, operation_id))?;

            let status = record.entries[idx].status;
            if status != expected {
                return Err(LockError::InvariantViolation(format!(
                    "operation {operation_id} on {key} is {status}, expected {expected}"
                )));
            }

            let entry = record.entries.remove(idx);
            match (entry.status, entry.mode) {
                (LockStatus::Acquired, LockMode::Read) => {
                    record.readers = record.readers.saturating_sub(1)
                }
                (LockStatus::Acquired, LockMode::Write) => record.writer_held = false,
                (LockStatus::Blocked, LockMode::Write) => {
                    record.waiting_writers = record.waiting_writers.saturating_sub(1)
                }
                (LockStatus::Blocked, LockMode::Read) => {}
            }
            record.ref_count = record.ref_count.saturating_sub(1);

            let wakeup = record.wakeup.clone();
            if record.ref_count == 0 {
                records.remove(key);
            }
            (wakeup, entry.mode)
        };

        wakeup.notify_waiters();
        Ok(mode)
    }

    /// Lists entries on resources in `volume` whose path starts with
    /// `prefix`. A non-zero `older_than` keeps only entries at least that
    /// old; zero keeps everything.
    pub fn list_locks(&self, volume: &str, prefix: &str, older_than: Duration) -> Vec<LockInfo> {
        let records = self.records();
        records
            .iter()
            .filter(|(key, _)| key.matches(volume, prefix))
            .flat_map(|(key, record)| {
                record
                    .entries
                    .iter()
                    .filter(move |entry| older_than.is_zero() || entry.age() >= older_than)
                    .map(move |entry| LockInfo::from_entry(key, entry))
            })
            .collect()
    }

    pub fn summary(&self) -> LockSummary {
        let records = self.records();
        let mut summary = LockSummary {
            resources: records.len(),
            ..LockSummary::default()
        };
        for entry in records.values().flat_map(|r| r.entries.iter()) {
            summary.total_locks += 1;
            match entry.status {
                LockStatus::Blocked => summary.total_blocked += 1,
                LockStatus::Acquired => summary.total_acquired += 1,
            }
        }
        summary
    }

    /// Counters for one resource, `None` when it has no record.
    pub fn state(&self, key: &ResourceKey) -> Option<RecordState> {
        self.records().get(key).map(|record| RecordState {
            readers: record.readers,
            writer_held: record.writer_held,
            waiting_writers: record.waiting_writers,
            ref_count: record.ref_count,
            entries: record.entries.len(),
        })
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }
}

fn unknown_operation(key: &ResourceKey, operation_id: &str) -> LockError {
    LockError::InvariantViolation(format!("no lock entry for operation {operation_id} on {key}"))
}

fn blocked_position(record: &LockRecord, key: &ResourceKey, operation_id: &str) -> LockResult<usize> {
    let idx = record
        .position(operation_id)
        .ok_or_else(|| unknown_operation(key, operation_id))?;
    if record.entries[idx].status != LockStatus::Blocked {
        return Err(LockError::InvariantViolation(format!(
            "operation {operation_id} on {key} is already acquired"
        )));
    }
    Ok(idx)
}

/// Retracts a blocked entry when dropped, unless disarmed.
///
/// Acquisition futures hold one of these across every await point so that
/// a cancelled or timed-out request never leaves a blocked entry behind.
#[derive(Debug)]
pub struct PendingEntry<'a> {
    table: &'a LockStateTable,
    key: ResourceKey,
    operation_id: String,
    armed: bool,
}

impl<'a> PendingEntry<'a> {
    pub fn new(table: &'a LockStateTable, key: ResourceKey, operation_id: String) -> Self {
        Self {
            table,
            key,
            operation_id,
            armed: true,
        }
    }

    /// The entry was granted; keep it.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        if self.armed
            && let Err(e) = self.table.retract(&self.key, &self.operation_id)
        {
            warn!(lock.resource = %self.key, operation_id = %self.operation_id, error = %e, "failed to retract pending lock entry");
        }
    }
}
