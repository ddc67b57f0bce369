//! Namespace lock manager: hands out per-resource lock handles over the
//! configured backend and answers instrumentation queries.

use std::panic::Location;
use std::sync::Arc;
use std::time::Duration;

use namespace_lock_core::error::{LockError, LockResult};
use namespace_lock_core::info::{LockInfo, LockSummary};
use namespace_lock_core::key::{LockMode, ResourceKey};
use namespace_lock_core::table::LockStateTable;
use namespace_lock_core::traits::{LockGrant, LockRequest, NamespaceLockBackend};
use namespace_lock_dsync::{DistributedBackend, DistributedBackendBuilder, DistributedGrant, LockPeer};
use namespace_lock_local::{LocalBackend, LocalGrant};
use tokio::sync::watch;
use tracing::info;

use crate::handle::NamespaceLock;

// ============================================================================
// Backend dispatch
// ============================================================================

/// The backend chosen when the manager was built.
#[derive(Debug, Clone)]
pub enum Backend {
    Local(LocalBackend),
    Distributed(DistributedBackend),
}

/// Grant returned by [`Backend`].
#[derive(Debug)]
pub enum Grant {
    Local(LocalGrant),
    Distributed(DistributedGrant),
}

impl LockGrant for Grant {
    fn key(&self) -> &ResourceKey {
        match self {
            Self::Local(grant) => grant.key(),
            Self::Distributed(grant) => grant.key(),
        }
    }

    fn mode(&self) -> LockMode {
        match self {
            Self::Local(grant) => grant.mode(),
            Self::Distributed(grant) => grant.mode(),
        }
    }

    fn operation_id(&self) -> &str {
        match self {
            Self::Local(grant) => grant.operation_id(),
            Self::Distributed(grant) => grant.operation_id(),
        }
    }

    fn lost_token(&self) -> &watch::Receiver<bool> {
        match self {
            Self::Local(grant) => grant.lost_token(),
            Self::Distributed(grant) => grant.lost_token(),
        }
    }
}

impl NamespaceLockBackend for Backend {
    type Grant = Grant;

    fn name(&self) -> &'static str {
        match self {
            Self::Local(backend) => backend.name(),
            Self::Distributed(backend) => backend.name(),
        }
    }

    fn table(&self) -> &Arc<LockStateTable> {
        match self {
            Self::Local(backend) => backend.table(),
            Self::Distributed(backend) => backend.table(),
        }
    }

    async fn acquire(&self, request: LockRequest) -> LockResult<Grant> {
        match self {
            Self::Local(backend) => backend.acquire(request).await.map(Grant::Local),
            Self::Distributed(backend) => backend.acquire(request).await.map(Grant::Distributed),
        }
    }

    async fn try_acquire(&self, request: LockRequest) -> LockResult<Option<Grant>> {
        match self {
            Self::Local(backend) => Ok(backend.try_acquire(request).await?.map(Grant::Local)),
            Self::Distributed(backend) => {
                Ok(backend.try_acquire(request).await?.map(Grant::Distributed))
            }
        }
    }

    fn release(&self, grant: Grant) -> LockResult<()> {
        match (self, grant) {
            (Self::Local(backend), Grant::Local(grant)) => backend.release(grant),
            (Self::Distributed(backend), Grant::Distributed(grant)) => backend.release(grant),
            (backend, grant) => Err(LockError::InvariantViolation(format!(
                "grant for operation {} was not issued by the {} backend",
                grant.operation_id(),
                backend.name()
            ))),
        }
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Entry point for namespace locking.
///
/// Cloning is cheap; clones share the backend and its lock state table.
///
/// # Example
///
/// ```rust,no_run
/// use namespace_lock::NamespaceLockManager;
///
/// # async fn example() -> namespace_lock::LockResult<()> {
/// let manager = NamespaceLockManager::local();
/// let lock = manager.new_lock("bucket", "photos/cat.png")?;
/// lock.lock().await?;
/// // Exclusive access to bucket/photos/cat.png
/// lock.unlock()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct NamespaceLockManager {
    backend: Arc<Backend>,
}

impl NamespaceLockManager {
    pub fn builder() -> NamespaceLockManagerBuilder {
        NamespaceLockManagerBuilder::new()
    }

    /// A manager that serializes access within this process only.
    pub fn local() -> Self {
        Self::from_backend(Backend::Local(LocalBackend::new()))
    }

    /// Wraps an already configured backend.
    pub fn from_backend(backend: Backend) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn is_distributed(&self) -> bool {
        matches!(*self.backend, Backend::Distributed(_))
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// The table every request of this manager is recorded in.
    pub fn table(&self) -> &Arc<LockStateTable> {
        self.backend.table()
    }

    /// Creates a handle for `volume`/`path`.
    ///
    /// No lock is taken and nothing is recorded until the handle is used.
    /// The caller's source location is reported by [`list_locks`](Self::list_locks).
    ///
    /// # Errors
    ///
    /// Returns [`LockError::InvalidResource`] if either component is empty.
    #[track_caller]
    pub fn new_lock(&self, volume: &str, path: &str) -> LockResult<NamespaceLock> {
        let key = ResourceKey::new(volume, path)?;
        let caller = Location::caller();
        let source = format!("{}:{}", caller.file(), caller.line());
        Ok(NamespaceLock::new(self.backend.clone(), key, source))
    }

    /// Lists every lock entry on `volume` whose path starts with `prefix`.
    ///
    /// A non-zero `older_than` keeps only entries at least that old. Each
    /// waiting or holding request is one entry.
    pub fn list_locks(&self, volume: &str, prefix: &str, older_than: Duration) -> Vec<LockInfo> {
        self.table().list_locks(volume, prefix, older_than)
    }

    /// Totals over the whole table, taken from one snapshot.
    pub fn lock_summary(&self) -> LockSummary {
        self.table().summary()
    }
}

impl Default for NamespaceLockManager {
    fn default() -> Self {
        Self::local()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`NamespaceLockManager`].
///
/// Timing settings only apply in distributed mode.
pub struct NamespaceLockManagerBuilder {
    distributed: bool,
    table: Option<Arc<LockStateTable>>,
    dsync: DistributedBackendBuilder,
}

impl NamespaceLockManagerBuilder {
    pub fn new() -> Self {
        Self {
            distributed: false,
            table: None,
            dsync: DistributedBackendBuilder::new(),
        }
    }

    /// Selects the quorum-based backend.
    ///
    /// Default: `false`
    pub fn distributed(mut self, distributed: bool) -> Self {
        self.distributed = distributed;
        self
    }

    /// Adds a lock peer. This node's own server counts as a peer.
    pub fn peer(mut self, peer: Arc<dyn LockPeer>) -> Self {
        self.dsync = self.dsync.peer(peer);
        self
    }

    pub fn peers(mut self, peers: impl IntoIterator<Item = Arc<dyn LockPeer>>) -> Self {
        self.dsync = self.dsync.peers(peers);
        self
    }

    /// Shares an existing lock state table.
    pub fn table(mut self, table: Arc<LockStateTable>) -> Self {
        self.table = Some(table);
        self
    }

    /// Default: 5 seconds
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.dsync = self.dsync.acquire_timeout(timeout);
        self
    }

    /// Lease lifetime on peers. Default: 30 seconds
    pub fn expiry(mut self, expiry: Duration) -> Self {
        self.dsync = self.dsync.expiry(expiry);
        self
    }

    /// How often held leases are renewed. Default: a third of the expiry
    pub fn extension_cadence(mut self, cadence: Duration) -> Self {
        self.dsync = self.dsync.extension_cadence(cadence);
        self
    }

    /// Bounds of the random pause between acquisition rounds.
    ///
    /// Default: 10ms to 200ms
    pub fn retry_sleep_range(mut self, min: Duration, max: Duration) -> Self {
        self.dsync = self.dsync.retry_sleep_range(min, max);
        self
    }

    /// Node name sent to peers.
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.dsync = self.dsync.owner(owner);
        self
    }

    /// # Errors
    ///
    /// Returns [`LockError::Config`] in distributed mode when no peers are
    /// configured or the timing settings are inconsistent.
    pub fn build(self) -> LockResult<NamespaceLockManager> {
        let table = self.table.unwrap_or_default();
        let backend = if self.distributed {
            Backend::Distributed(self.dsync.table(table).build()?)
        } else {
            Backend::Local(LocalBackend::with_table(table))
        };
        info!(backend = backend.name(), "namespace lock manager created");
        Ok(NamespaceLockManager::from_backend(backend))
    }
}

impl Default for NamespaceLockManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
