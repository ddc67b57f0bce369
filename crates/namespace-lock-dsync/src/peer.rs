//! The contract every lock-holding peer implements.
//!
//! The transport is up to the implementor; [`LockServer`](crate::LockServer)
//! is the in-process implementation that also serves as the peer-side state
//! for remote transports.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use namespace_lock_core::error::LockResult;

/// Boxed future returned by peer calls.
pub type PeerFuture<'a, T> = Pin<Box<dyn Future<Output = LockResult<T>> + Send + 'a>>;

/// Arguments of a single peer call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockArgs {
    /// Unique ID of this acquisition round; only its owner may release or
    /// refresh the lease.
    pub uid: String,
    /// Resource name, `volume/path`.
    pub resource: String,
    /// Node that requested the lock.
    pub owner: String,
    /// Caller identity, for peer-side diagnostics.
    pub source: String,
    /// Lease length granted on success.
    pub ttl: Duration,
}

/// A peer that holds lock leases for part of the cluster.
///
/// Every call answers `Ok(true)` when the peer applied the request,
/// `Ok(false)` when it refused (held in a conflicting mode, or not the
/// owner), and `Err(_)` when the peer could not be reached.
pub trait LockPeer: Send + Sync + fmt::Debug {
    /// Address or name used in logs.
    fn endpoint(&self) -> &str;

    fn rlock(&self, args: LockArgs) -> PeerFuture<'_, bool>;

    fn lock(&self, args: LockArgs) -> PeerFuture<'_, bool>;

    fn runlock(&self, args: LockArgs) -> PeerFuture<'_, bool>;

    fn unlock(&self, args: LockArgs) -> PeerFuture<'_, bool>;

    /// Extends the lease held by `args.uid`.
    fn refresh(&self, args: LockArgs) -> PeerFuture<'_, bool>;

    /// Drops every lease on `args.resource`, whoever owns it.
    fn force_unlock(&self, args: LockArgs) -> PeerFuture<'_, bool>;

    /// Cheap local check; offline peers are skipped without a call.
    fn is_online(&self) -> bool {
        true
    }
}
