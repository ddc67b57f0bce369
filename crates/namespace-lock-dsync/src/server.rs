//! In-process lock server: the peer-side lease table.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::peer::{LockArgs, LockPeer, PeerFuture};

#[derive(Debug, Clone)]
struct Lease {
    uid: String,
    owner: String,
    expires_at: Instant,
}

impl Lease {
    fn new(args: &LockArgs, now: Instant) -> Self {
        Self {
            uid: args.uid.clone(),
            owner: args.owner.clone(),
            expires_at: now + args.ttl,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Leases on one resource: a single writer or any number of readers.
#[derive(Debug, Default)]
struct ResourceLeases {
    writer: Option<Lease>,
    readers: HashMap<String, Lease>,
}

impl ResourceLeases {
    /// Drops expired leases, returning how many were reclaimed.
    fn purge(&mut self, now: Instant) -> usize {
        let mut reclaimed = 0;
        if self.writer.as_ref().is_some_and(|w| !w.is_live(now)) {
            self.writer = None;
            reclaimed += 1;
        }
        let before = self.readers.len();
        self.readers.retain(|_, lease| lease.is_live(now));
        reclaimed + (before - self.readers.len())
    }

    fn is_empty(&self) -> bool {
        self.writer.is_none() && self.readers.is_empty()
    }
}

/// Lease table for one peer.
///
/// Requests against an expired lease treat it as absent, so a lock whose
/// holder stopped renewing becomes available again once its TTL passes.
#[derive(Debug)]
pub struct LockServer {
    endpoint: String,
    resources: Mutex<HashMap<String, ResourceLeases>>,
}

impl LockServer {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            resources: Mutex::new(HashMap::new()),
        }
    }

    fn resources(&self) -> MutexGuard<'_, HashMap<String, ResourceLeases>> {
        self.resources.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` on the live leases of `resource`, dropping the entry if it
    /// ends up empty.
    fn with_resource<T>(&self, resource: &str, f: impl FnOnce(&mut ResourceLeases, Instant) -> T) -> T {
        let now = Instant::now();
        let mut resources = self.resources();
        let leases = resources.entry(resource.to_string()).or_default();
        if leases.purge(now) > 0 {
            debug!(endpoint = %self.endpoint, resource, "reclaimed expired lease");
        }
        let result = f(leases, now);
        if leases.is_empty() {
            resources.remove(resource);
        }
        result
    }

    #[instrument(level = "trace", skip(self), fields(endpoint = %self.endpoint))]
    pub fn try_lock(&self, args: &LockArgs) -> bool {
        self.with_resource(&args.resource, |leases, now| {
            if let Some(writer) = &leases.writer {
                // A retried request from the same round is already granted.
                return writer.uid == args.uid;
            }
            if !leases.readers.is_empty() {
                return false;
            }
            leases.writer = Some(Lease::new(args, now));
            true
        })
    }

    #[instrument(level = "trace", skip(self), fields(endpoint = %self.endpoint))]
    pub fn try_rlock(&self, args: &LockArgs) -> bool {
        self.with_resource(&args.resource, |leases, now| {
            if leases.writer.is_some() {
                return false;
            }
            leases
                .readers
                .entry(args.uid.clone())
                .or_insert_with(|| Lease::new(args, now));
            true
        })
    }

    pub fn try_unlock(&self, args: &LockArgs) -> bool {
        self.with_resource(&args.resource, |leases, _| {
            if leases.writer.as_ref().is_some_and(|w| w.uid == args.uid) {
                leases.writer = None;
                true
            } else {
                false
            }
        })
    }

    pub fn try_runlock(&self, args: &LockArgs) -> bool {
        self.with_resource(&args.resource, |leases, _| {
            leases.readers.remove(&args.uid).is_some()
        })
    }

    pub fn try_refresh(&self, args: &LockArgs) -> bool {
        self.with_resource(&args.resource, |leases, now| {
            let expires_at = now + args.ttl;
            if let Some(writer) = leases.writer.as_mut().filter(|w| w.uid == args.uid) {
                writer.expires_at = expires_at;
                return true;
            }
            match leases.readers.get_mut(&args.uid) {
                Some(reader) => {
                    reader.expires_at = expires_at;
                    true
                }
                None => false,
            }
        })
    }

    pub fn force_release(&self, resource: &str) -> bool {
        let removed = self.resources().remove(resource).is_some();
        if removed {
            debug!(endpoint = %self.endpoint, resource, "force unlocked");
        }
        removed
    }

    /// Sweeps every resource for expired leases.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut resources = self.resources();
        let mut reclaimed = 0;
        resources.retain(|_, leases| {
            reclaimed += leases.purge(now);
            !leases.is_empty()
        });
        reclaimed
    }

    /// Live leases across all resources.
    pub fn active_leases(&self) -> usize {
        let now = Instant::now();
        self.resources()
            .values()
            .map(|leases| {
                leases.writer.iter().filter(|w| w.is_live(now)).count()
                    + leases.readers.values().filter(|r| r.is_live(now)).count()
            })
            .sum()
    }

    /// Owner of the live write lease on `resource`, if any.
    pub fn writer_owner(&self, resource: &str) -> Option<String> {
        let now = Instant::now();
        self.resources()
            .get(resource)
            .and_then(|leases| leases.writer.as_ref())
            .filter(|w| w.is_live(now))
            .map(|w| w.owner.clone())
    }
}

impl LockPeer for LockServer {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn rlock(&self, args: LockArgs) -> PeerFuture<'_, bool> {
        Box::pin(async move { Ok(self.try_rlock(&args)) })
    }

    fn lock(&self, args: LockArgs) -> PeerFuture<'_, bool> {
        Box::pin(async move { Ok(self.try_lock(&args)) })
    }

    fn runlock(&self, args: LockArgs) -> PeerFuture<'_, bool> {
        Box::pin(async move { Ok(self.try_runlock(&args)) })
    }

    fn unlock(&self, args: LockArgs) -> PeerFuture<'_, bool> {
        Box::pin(async move { Ok(self.try_unlock(&args)) })
    }

    fn refresh(&self, args: LockArgs) -> PeerFuture<'_, bool> {
        Box::pin(async move { Ok(self.try_refresh(&args)) })
    }

    fn force_unlock(&self, args: LockArgs) -> PeerFuture<'_, bool> {
        Box::pin(async move { Ok(self.force_release(&args.resource)) })
    }
}
