//! Core traits for namespace lock backends.

use std::future::Future;
use std::sync::Arc;

use crate::error::LockResult;
use crate::key::{LockMode, ResourceKey};
use crate::table::LockStateTable;

// ============================================================================
// Lock Request
// ============================================================================

/// One acquisition attempt on a resource.
///
/// Every request carries a unique operation ID; the same ID identifies its
/// entry in the lock state table until the lock is released.
#[derive(Debug, Clone)]
pub struct LockRequest {
    pub key: ResourceKey,
    pub mode: LockMode,
    pub operation_id: String,
    /// Caller identity shown by instrumentation.
    pub source: String,
}

impl LockRequest {
    pub fn new(
        key: ResourceKey,
        mode: LockMode,
        operation_id: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            key,
            mode,
            operation_id: operation_id.into(),
            source: source.into(),
        }
    }
}

// ============================================================================
// Lock Grant Trait
// ============================================================================

/// Proof that a request was granted.
///
/// A grant is handed back to [`NamespaceLockBackend::release`]; it is not
/// released on drop.
pub trait LockGrant: Send + Sync {
    fn key(&self) -> &ResourceKey;

    fn mode(&self) -> LockMode;

    fn operation_id(&self) -> &str;

    /// Returns a receiver that signals when the lock is lost.
    ///
    /// The receiver yields `true` when a distributed lease could not be
    /// renewed. Local grants never change from `false`.
    fn lost_token(&self) -> &tokio::sync::watch::Receiver<bool>;
}

// ============================================================================
// Backend Trait
// ============================================================================

/// Shared/exclusive locking over resource keys.
///
/// Implementations record every request in their [`LockStateTable`] so that
/// instrumentation works the same way whichever backend is active.
///
/// # Example
///
/// ```rust,ignore
/// let request = LockRequest::new(key, LockMode::Write, op_id, "upload");
/// let grant = backend.acquire(request).await?;
/// // Exclusive access to the resource
/// backend.release(grant)?;
/// ```
pub trait NamespaceLockBackend: Send + Sync {
    /// The grant type returned when a request succeeds.
    type Grant: LockGrant;

    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    /// The table this backend keeps its bookkeeping in.
    fn table(&self) -> &Arc<LockStateTable>;

    /// Acquires the requested access, suspending until it is granted.
    ///
    /// # Returns
    ///
    /// * `Ok(grant)` - Access granted
    /// * `Err(LockError::Timeout)` - Bounded backend gave up waiting
    /// * `Err(LockError::PeerUnavailable)` - Too few peers to form a quorum
    ///
    /// # Cancellation
    ///
    /// Dropping the returned future retracts the request's blocked entry.
    fn acquire(&self, request: LockRequest)
    -> impl Future<Output = LockResult<Self::Grant>> + Send;

    /// Attempts to acquire without waiting for contending holders.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(grant))` - Access granted
    /// * `Ok(None)` - Resource is held in a conflicting mode
    fn try_acquire(
        &self,
        request: LockRequest,
    ) -> impl Future<Output = LockResult<Option<Self::Grant>>> + Send;

    /// Releases a grant. Never waits on other holders.
    fn release(&self, grant: Self::Grant) -> LockResult<()>;
}
