//! Quorum release.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use namespace_lock_core::error::{LockError, LockResult};
use tokio::task::JoinSet;

use crate::peer::LockPeer;

use super::helper::QuorumHelper;

/// Releases a lease on every peer that may hold it.
///
/// A peer answering `false` no longer had the lease, which is fine. Only
/// unreachable peers count as faults; their leases expire on their own.
/// Fails if a majority of the targeted peers could not be reached.
///
/// # Arguments
///
/// * `try_release_fn` - Function that attempts to release on a single peer
/// * `peers` - All peers owning the namespace
/// * `holders` - Peers that may hold the lease, indexed like `peers`
/// * `call_timeout` - Upper bound for each peer call
pub async fn release_quorum<F, Fut>(
    try_release_fn: F,
    peers: &[Arc<dyn LockPeer>],
    holders: &[bool],
    call_timeout: Duration,
) -> LockResult<()>
where
    F: Fn(Arc<dyn LockPeer>) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = LockResult<bool>> + Send + 'static,
{
    let mut tasks = JoinSet::new();
    for (peer, _) in peers.iter().zip(holders).filter(|&(_, &held)| held) {
        let peer = peer.clone();
        let try_release_fn = try_release_fn.clone();
        tasks.spawn(async move {
            let endpoint = peer.endpoint().to_string();
            let result = tokio::time::timeout(call_timeout, try_release_fn(peer)).await;
            (endpoint, result)
        });
    }

    let total_peers = tasks.len();
    if total_peers == 0 {
        return Ok(());
    }

    let mut success_count = 0;
    let mut errors: Vec<LockError> = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(Ok(_)))) => success_count += 1,
            Ok((_, Ok(Err(e)))) => errors.push(e),
            Ok((endpoint, Err(_))) => errors.push(LockError::Connection(Box::new(
                std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("release on peer {endpoint} timed out"),
                ),
            ))),
            Err(e) => errors.push(LockError::Backend(Box::new(e))),
        }
    }

    if QuorumHelper::has_sufficient_successes(success_count, QuorumHelper::write_quorum(total_peers)) {
        Ok(())
    } else {
        Err(errors.into_iter().next().unwrap_or_else(|| {
            LockError::Backend(Box::new(std::io::Error::other(
                "failed to release lock on majority of peers",
            )))
        }))
    }
}
