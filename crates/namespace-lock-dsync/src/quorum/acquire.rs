//! Quorum acquire round.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use namespace_lock_core::error::LockResult;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::error::Elapsed;
use tracing::{debug, warn};

use crate::peer::LockPeer;

use super::helper::QuorumHelper;

/// How one peer answered an acquire call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerOutcome {
    Granted,
    /// The peer answered but the resource is held in a conflicting mode.
    Refused,
    /// Offline, erroring or too slow; the peer may or may not hold a lease.
    Unreachable,
    /// Still unanswered when the round was decided.
    Pending,
}

/// Result of one acquire round, indexed by peer position.
#[derive(Debug, Clone)]
pub struct QuorumRound {
    pub outcomes: Vec<PeerOutcome>,
}

impl QuorumRound {
    pub fn new(outcomes: Vec<PeerOutcome>) -> Self {
        Self { outcomes }
    }

    pub fn granted(&self) -> usize {
        self.count(|o| o == PeerOutcome::Granted)
    }

    /// Peers not known to be unreachable: answered or still pending.
    pub fn reachable(&self) -> usize {
        self.count(|o| o != PeerOutcome::Unreachable)
    }

    pub fn is_successful(&self, quorum: usize) -> bool {
        QuorumHelper::has_sufficient_successes(self.granted(), quorum)
    }

    /// Peers that may hold a lease from this round.
    pub fn holders(&self) -> Vec<bool> {
        self.outcomes
            .iter()
            .map(|&o| o != PeerOutcome::Refused)
            .collect()
    }

    fn count(&self, f: impl Fn(PeerOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|&&o| f(o)).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Undecided,
    Keep,
    Abandon,
}

/// Ownership of the leases won by one acquire round.
///
/// Unless [`keep`](Self::keep) is called, dropping the guard abandons the
/// round: every lease it won is released, including leases granted by
/// peers that answer afterwards. Dropping an acquisition future therefore
/// never strands a lease until its expiry.
#[derive(Debug)]
pub struct RoundGuard {
    verdict: watch::Sender<Verdict>,
}

impl RoundGuard {
    /// Hands the round's leases to a grant; late grants are kept too.
    pub fn keep(self) {
        self.verdict.send_replace(Verdict::Keep);
    }
}

impl Drop for RoundGuard {
    fn drop(&mut self) {
        self.verdict.send_if_modified(|verdict| {
            if *verdict == Verdict::Undecided {
                *verdict = Verdict::Abandon;
                true
            } else {
                false
            }
        });
    }
}

/// Sends one acquire call to every online peer in parallel.
///
/// Returns as soon as the outcome is decided: `quorum` peers granted, or
/// so many refused that `quorum` is out of reach. Calls still in flight
/// keep running in the background and show up as [`PeerOutcome::Pending`].
/// Each call is bounded by `call_timeout`; a call that errors or times out
/// counts as [`PeerOutcome::Unreachable`].
///
/// # Arguments
///
/// * `try_acquire_fn` - Function that attempts the lock on a single peer
/// * `try_release_fn` - Function that releases it again if the round is abandoned
/// * `peers` - All peers owning the namespace
/// * `quorum` - Grants needed for the round to succeed
/// * `call_timeout` - Upper bound for each peer call
pub async fn acquire_quorum<F, Fut, R, RFut>(
    try_acquire_fn: F,
    try_release_fn: R,
    peers: &[Arc<dyn LockPeer>],
    quorum: usize,
    call_timeout: Duration,
) -> (QuorumRound, RoundGuard)
where
    F: Fn(Arc<dyn LockPeer>) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = LockResult<bool>> + Send + 'static,
    R: Fn(Arc<dyn LockPeer>) -> RFut + Send + Sync + Clone + 'static,
    RFut: Future<Output = LockResult<bool>> + Send + 'static,
{
    let (verdict_tx, verdict_rx) = watch::channel(Verdict::Undecided);
    let guard = RoundGuard {
        verdict: verdict_tx,
    };

    let mut outcomes = vec![PeerOutcome::Unreachable; peers.len()];
    let mut calls = JoinSet::new();
    for (idx, peer) in peers.iter().enumerate() {
        if !peer.is_online() {
            debug!(endpoint = peer.endpoint(), "skipping offline peer");
            continue;
        }
        outcomes[idx] = PeerOutcome::Pending;
        let peer = peer.clone();
        let try_acquire_fn = try_acquire_fn.clone();
        calls.spawn(async move {
            let result = tokio::time::timeout(call_timeout, try_acquire_fn(peer.clone())).await;
            (idx, classify(peer.endpoint(), call_timeout, result))
        });
    }
    if calls.is_empty() {
        return (QuorumRound::new(outcomes), guard);
    }

    let (answer_tx, mut answers) = mpsc::unbounded_channel();
    tokio::spawn(settle_round(
        calls,
        answer_tx,
        verdict_rx,
        peers.to_vec(),
        try_release_fn,
        call_timeout,
    ));

    let (mut granted, mut refused) = (0, 0);
    while let Some((idx, outcome)) = answers.recv().await {
        outcomes[idx] = outcome;
        match outcome {
            PeerOutcome::Granted => granted += 1,
            PeerOutcome::Refused => refused += 1,
            _ => {}
        }
        if QuorumHelper::has_sufficient_successes(granted, quorum)
            || QuorumHelper::has_too_many_failures_or_faults(refused, quorum, peers.len())
        {
            break;
        }
    }

    (QuorumRound::new(outcomes), guard)
}

fn classify(
    endpoint: &str,
    call_timeout: Duration,
    result: Result<LockResult<bool>, Elapsed>,
) -> PeerOutcome {
    match result {
        Ok(Ok(true)) => PeerOutcome::Granted,
        Ok(Ok(false)) => PeerOutcome::Refused,
        Ok(Err(e)) => {
            debug!(endpoint, error = %e, "peer lock call failed");
            PeerOutcome::Unreachable
        }
        Err(_) => {
            debug!(endpoint, ?call_timeout, "peer lock call timed out");
            PeerOutcome::Unreachable
        }
    }
}

/// Drives the calls of one round to completion.
///
/// Answers are forwarded to the caller while it listens. Once the caller
/// abandons the round, every lease granted so far is released, and so is
/// every lease granted after that.
async fn settle_round<R, RFut>(
    mut calls: JoinSet<(usize, PeerOutcome)>,
    answer_tx: mpsc::UnboundedSender<(usize, PeerOutcome)>,
    mut verdict: watch::Receiver<Verdict>,
    peers: Vec<Arc<dyn LockPeer>>,
    try_release_fn: R,
    call_timeout: Duration,
) where
    R: Fn(Arc<dyn LockPeer>) -> RFut + Send + Sync + Clone + 'static,
    RFut: Future<Output = LockResult<bool>> + Send + 'static,
{
    let release = |idx: usize| {
        let peer = peers[idx].clone();
        let try_release_fn = try_release_fn.clone();
        tokio::spawn(async move {
            let endpoint = peer.endpoint().to_string();
            match tokio::time::timeout(call_timeout, try_release_fn(peer)).await {
                Ok(Ok(_)) => debug!(endpoint, "released lease of abandoned round"),
                Ok(Err(e)) => {
                    warn!(endpoint, error = %e, "failed to release lease of abandoned round; it will expire")
                }
                Err(_) => {
                    warn!(endpoint, ?call_timeout, "release of abandoned round timed out; lease will expire")
                }
            }
        });
    };

    // Dropped after the last answer so the caller stops listening.
    let mut answer_tx = Some(answer_tx);
    let mut won = Vec::new();
    let mut decided = false;
    let mut abandoned = false;

    loop {
        tokio::select! {
            joined = calls.join_next(), if !calls.is_empty() => {
                match joined {
                    Some(Ok((idx, outcome))) => {
                        if outcome == PeerOutcome::Granted {
                            if abandoned {
                                release(idx);
                            } else {
                                won.push(idx);
                            }
                        }
                        if let Some(tx) = &answer_tx {
                            let _ = tx.send((idx, outcome));
                        }
                    }
                    // Task panicked; its peer stays pending for the caller
                    Some(Err(e)) => debug!(error = %e, "peer lock task failed"),
                    None => {}
                }
                if calls.is_empty() {
                    answer_tx = None;
                }
            }
            kept = is_kept(&mut verdict), if !decided => {
                decided = true;
                abandoned = !kept;
                if abandoned {
                    won.drain(..).for_each(&release);
                }
            }
            else => break,
        }
    }
}

/// Waits for the caller's decision on the round.
async fn is_kept(verdict: &mut watch::Receiver<Verdict>) -> bool {
    // A closed channel means the guard is gone without a decision.
    match verdict.wait_for(|v| *v != Verdict::Undecided).await {
        Ok(decision) => *decision == Verdict::Keep,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::LockArgs;
    use crate::server::LockServer;

    #[test]
    fn test_round_counts() {
        let round = QuorumRound::new(vec![
            PeerOutcome::Granted,
            PeerOutcome::Refused,
            PeerOutcome::Unreachable,
            PeerOutcome::Granted,
            PeerOutcome::Pending,
        ]);
        assert_eq!(round.granted(), 2);
        assert_eq!(round.reachable(), 4);
        assert!(round.is_successful(2));
        assert!(!round.is_successful(3));
        assert_eq!(round.holders(), vec![true, false, true, true, true]);
    }

    fn args(uid: &str) -> LockArgs {
        LockArgs {
            uid: uid.to_string(),
            resource: "bucket/object".to_string(),
            owner: "node-1".to_string(),
            source: "test".to_string(),
            ttl: Duration::from_secs(30),
        }
    }

    async fn round(
        servers: &[Arc<LockServer>],
        uid: &'static str,
        quorum: usize,
    ) -> (QuorumRound, RoundGuard) {
        let peers: Vec<Arc<dyn LockPeer>> = servers.iter().map(|s| s.clone() as Arc<dyn LockPeer>).collect();
        acquire_quorum(
            move |peer| async move { peer.lock(args(uid)).await },
            move |peer| async move { peer.unlock(args(uid)).await },
            &peers,
            quorum,
            Duration::from_secs(1),
        )
        .await
    }

    async fn wait_for_leases(servers: &[Arc<LockServer>], expected: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while servers.iter().map(|s| s.active_leases()).sum::<usize>() != expected {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("leases did not settle");
    }

    #[tokio::test]
    async fn test_kept_round_holds_leases() {
        let servers: Vec<_> = (0..3).map(|i| Arc::new(LockServer::new(format!("p{i}")))).collect();
        let (outcome, guard) = round(&servers, "w1", 2).await;
        assert!(outcome.is_successful(2));
        guard.keep();

        wait_for_leases(&servers, 3).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(servers.iter().map(|s| s.active_leases()).sum::<usize>(), 3);
    }

    #[tokio::test]
    async fn test_dropped_guard_releases_leases() {
        let servers: Vec<_> = (0..3).map(|i| Arc::new(LockServer::new(format!("p{i}")))).collect();
        let (outcome, guard) = round(&servers, "w1", 2).await;
        assert!(outcome.is_successful(2));
        drop(guard);

        wait_for_leases(&servers, 0).await;
    }

    #[tokio::test]
    async fn test_round_stops_once_quorum_is_lost() {
        let servers: Vec<_> = (0..3).map(|i| Arc::new(LockServer::new(format!("p{i}")))).collect();
        for server in &servers[..2] {
            assert!(server.try_lock(&args("other")));
        }
        let (outcome, guard) = round(&servers, "w2", 2).await;
        assert!(!outcome.is_successful(2));
        drop(guard);

        // Only the other writer's two leases remain.
        wait_for_leases(&servers, 2).await;
    }
}
