//! Quorum lease extension.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use namespace_lock_core::error::LockResult;
use tokio::task::JoinSet;

use crate::peer::LockPeer;

use super::helper::QuorumHelper;

/// Extends a lease on every peer that may hold it.
///
/// # Returns
///
/// * `Some(true)` - At least `quorum` peers renewed the lease
/// * `Some(false)` - Too many peers refused; quorum is lost for good
/// * `None` - Inconclusive because some holders could not be reached
///
/// # Arguments
///
/// * `try_extend_fn` - Function that attempts to extend on a single peer
/// * `peers` - All peers owning the namespace
/// * `holders` - Peers that may hold the lease, indexed like `peers`
/// * `quorum` - Renewals needed to keep the lock
/// * `call_timeout` - Upper bound for each peer call
pub async fn extend_quorum<F, Fut>(
    try_extend_fn: F,
    peers: &[Arc<dyn LockPeer>],
    holders: &[bool],
    quorum: usize,
    call_timeout: Duration,
) -> Option<bool>
where
    F: Fn(Arc<dyn LockPeer>) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = LockResult<bool>> + Send + 'static,
{
    let mut tasks = JoinSet::new();
    for (peer, _) in peers.iter().zip(holders).filter(|&(_, &held)| held) {
        let peer = peer.clone();
        let try_extend_fn = try_extend_fn.clone();
        tasks.spawn(async move { tokio::time::timeout(call_timeout, try_extend_fn(peer)).await });
    }

    let holder_count = tasks.len();
    let mut success_count = 0;
    let mut refused_count = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(Ok(true))) => success_count += 1,
            Ok(Ok(Ok(false))) => refused_count += 1,
            // Unreachable holders may still have the lease
            _ => {}
        }
    }

    if QuorumHelper::has_sufficient_successes(success_count, quorum) {
        Some(true)
    } else if QuorumHelper::has_too_many_failures_or_faults(refused_count, quorum, holder_count) {
        // Even if every unreachable holder still had the lease, quorum is gone
        Some(false)
    } else {
        None
    }
}
