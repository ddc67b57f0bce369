//! Local readers-writer backend.

use std::pin::pin;
use std::sync::Arc;
use std::time::Instant;

use namespace_lock_core::error::LockResult;
use namespace_lock_core::info::LockEntry;
use namespace_lock_core::table::{LockStateTable, PendingEntry};
use namespace_lock_core::traits::{LockGrant, LockRequest, NamespaceLockBackend};
use tracing::{Span, debug, field, instrument};

use crate::handle::LocalGrant;

/// Backend that serializes access with in-process synchronization only.
///
/// Readers share a resource; a writer holds it alone. Once a writer is
/// queued no new reader is admitted ahead of it. Waiting is unbounded.
#[derive(Debug, Clone, Default)]
pub struct LocalBackend {
    table: Arc<LockStateTable>,
}

impl LocalBackend {
    /// Creates a backend with its own empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend over an existing table.
    pub fn with_table(table: Arc<LockStateTable>) -> Self {
        Self { table }
    }
}

impl NamespaceLockBackend for LocalBackend {
    type Grant = LocalGrant;

    fn name(&self) -> &'static str {
        "local"
    }

    fn table(&self) -> &Arc<LockStateTable> {
        &self.table
    }

    #[instrument(skip(self, request), fields(lock.volume = %request.key.volume(), lock.path = %request.key.path(), mode = %request.mode, backend = "local", acquired = field::Empty, elapsed_ms = field::Empty))]
    async fn acquire(&self, request: LockRequest) -> LockResult<Self::Grant> {
        let start = Instant::now();
        let wakeup = self.table.register(
            &request.key,
            LockEntry::blocked(&request.operation_id, request.mode, &request.source),
        )?;
        let pending = PendingEntry::new(&self.table, request.key.clone(), request.operation_id.clone());

        loop {
            // Enable before checking so a release between the check and the
            // await still wakes us.
            let mut notified = pin!(wakeup.notified());
            notified.as_mut().enable();

            if self.table.try_grant(&request.key, &request.operation_id)? {
                pending.disarm();
                let elapsed = start.elapsed();
                Span::current().record("acquired", true);
                Span::current().record("elapsed_ms", elapsed.as_millis() as u64);
                debug!(operation_id = %request.operation_id, "lock granted");
                return Ok(LocalGrant::new(request));
            }

            notified.await;
        }
    }

    #[instrument(skip(self, request), fields(lock.volume = %request.key.volume(), lock.path = %request.key.path(), mode = %request.mode, backend = "local", acquired = field::Empty))]
    async fn try_acquire(&self, request: LockRequest) -> LockResult<Option<Self::Grant>> {
        self.table.register(
            &request.key,
            LockEntry::blocked(&request.operation_id, request.mode, &request.source),
        )?;
        let pending = PendingEntry::new(&self.table, request.key.clone(), request.operation_id.clone());

        if self.table.try_grant(&request.key, &request.operation_id)? {
            pending.disarm();
            Span::current().record("acquired", true);
            Ok(Some(LocalGrant::new(request)))
        } else {
            drop(pending);
            Span::current().record("acquired", false);
            Ok(None)
        }
    }

    fn release(&self, grant: Self::Grant) -> LockResult<()> {
        self.table.release(grant.key(), grant.operation_id())?;
        debug!(lock.resource = %grant.key(), mode = %grant.mode(), operation_id = %grant.operation_id(), backend = "local", "lock released");
        Ok(())
    }
}
