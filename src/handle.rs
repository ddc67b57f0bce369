//! Per-resource lock handle.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use namespace_lock_core::error::{LockError, LockResult};
use namespace_lock_core::key::{LockMode, ResourceKey};
use namespace_lock_core::traits::{LockGrant, LockRequest, NamespaceLockBackend};
use tracing::warn;
use uuid::Uuid;

use crate::manager::{Backend, Grant};

/// Reader-writer lock on one `volume`/`path`, created by
/// [`NamespaceLockManager::new_lock`](crate::NamespaceLockManager::new_lock).
///
/// Each successful `rlock`/`lock` is a separate acquisition and must be
/// matched by one `runlock`/`unlock`. Acquisition is not reentrant: taking
/// a write lock while the same handle holds a read lock waits forever on
/// the local backend.
///
/// Dropping a handle that still holds grants releases them.
#[derive(Debug)]
pub struct NamespaceLock {
    backend: Arc<Backend>,
    key: ResourceKey,
    source: String,
    held: Mutex<Vec<Grant>>,
}

impl NamespaceLock {
    pub(crate) fn new(backend: Arc<Backend>, key: ResourceKey, source: String) -> Self {
        Self {
            backend,
            key,
            source,
            held: Mutex::new(Vec::new()),
        }
    }

    /// Overrides the caller identity shown by instrumentation.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn volume(&self) -> &str {
        self.key.volume()
    }

    pub fn path(&self) -> &str {
        self.key.path()
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Number of grants this handle currently holds.
    pub fn held_count(&self) -> usize {
        self.held().len()
    }

    /// Whether any held grant lost its distributed lease.
    pub fn is_lost(&self) -> bool {
        self.held().iter().any(|grant| *grant.lost_token().borrow())
    }

    /// Fails with [`LockError::LockLost`] if any held grant lost its lease.
    ///
    /// Call before committing work done under a distributed lock.
    pub fn check_held(&self) -> LockResult<()> {
        if self.is_lost() {
            return Err(LockError::LockLost(format!(
                "lease on {} could not be renewed",
                self.key
            )));
        }
        Ok(())
    }

    fn held(&self) -> MutexGuard<'_, Vec<Grant>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn request(&self, mode: LockMode) -> LockRequest {
        LockRequest::new(
            self.key.clone(),
            mode,
            Uuid::new_v4().to_string(),
            self.source.clone(),
        )
    }

    async fn acquire(&self, mode: LockMode) -> LockResult<()> {
        let grant = self.backend.acquire(self.request(mode)).await?;
        self.held().push(grant);
        Ok(())
    }

    async fn try_acquire(&self, mode: LockMode) -> LockResult<bool> {
        match self.backend.try_acquire(self.request(mode)).await? {
            Some(grant) => {
                self.held().push(grant);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn release(&self, mode: LockMode) -> LockResult<()> {
        let grant = {
            let mut held = self.held();
            let idx = held
                .iter()
                .rposition(|grant| grant.mode() == mode)
                .ok_or_else(|| LockError::NotHeld {
                    volume: self.key.volume().to_string(),
                    path: self.key.path().to_string(),
                    mode,
                })?;
            held.remove(idx)
        };
        self.backend.release(grant)
    }

    /// Acquires shared access, waiting while a writer holds or is queued
    /// for the resource.
    ///
    /// # Errors
    ///
    /// On the distributed backend, [`LockError::Timeout`] or
    /// [`LockError::PeerUnavailable`] once the acquire timeout passes.
    pub async fn rlock(&self) -> LockResult<()> {
        self.acquire(LockMode::Read).await
    }

    /// Acquires exclusive access.
    ///
    /// # Errors
    ///
    /// Same as [`rlock`](Self::rlock).
    pub async fn lock(&self) -> LockResult<()> {
        self.acquire(LockMode::Write).await
    }

    /// Like [`rlock`](Self::rlock), but gives up with
    /// [`LockError::Cancelled`] as soon as `cancel` completes.
    pub async fn rlock_until(&self, cancel: impl Future<Output = ()>) -> LockResult<()> {
        tokio::select! {
            result = self.acquire(LockMode::Read) => result,
            () = cancel => Err(LockError::Cancelled),
        }
    }

    /// Like [`lock`](Self::lock), but gives up with
    /// [`LockError::Cancelled`] as soon as `cancel` completes.
    pub async fn lock_until(&self, cancel: impl Future<Output = ()>) -> LockResult<()> {
        tokio::select! {
            result = self.acquire(LockMode::Write) => result,
            () = cancel => Err(LockError::Cancelled),
        }
    }

    /// Attempts shared access once. Returns `Ok(false)` when contended.
    pub async fn try_rlock(&self) -> LockResult<bool> {
        self.try_acquire(LockMode::Read).await
    }

    /// Attempts exclusive access once. Returns `Ok(false)` when contended.
    pub async fn try_lock(&self) -> LockResult<bool> {
        self.try_acquire(LockMode::Write).await
    }

    /// Releases one shared grant held by this handle.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::NotHeld`] if the handle holds no read lock.
    pub fn runlock(&self) -> LockResult<()> {
        self.release(LockMode::Read)
    }

    /// Releases the exclusive grant held by this handle.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::NotHeld`] if the handle holds no write lock.
    pub fn unlock(&self) -> LockResult<()> {
        self.release(LockMode::Write)
    }
}

impl Drop for NamespaceLock {
    fn drop(&mut self) {
        let held = std::mem::take(self.held.get_mut().unwrap_or_else(PoisonError::into_inner));
        for grant in held {
            warn!(
                lock.volume = %self.key.volume(),
                lock.path = %self.key.path(),
                mode = %grant.mode(),
                source = %self.source,
                "lock handle dropped while held; releasing"
            );
            if let Err(e) = self.backend.release(grant) {
                warn!(lock.resource = %self.key, error = %e, "failed to release dropped lock");
            }
        }
    }
}
