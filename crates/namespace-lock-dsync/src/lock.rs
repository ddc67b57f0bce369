//! Quorum-based distributed backend.

use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use namespace_lock_core::error::{LockError, LockResult};
use namespace_lock_core::info::LockEntry;
use namespace_lock_core::key::{LockMode, ResourceKey};
use namespace_lock_core::table::{LockStateTable, PendingEntry};
use namespace_lock_core::traits::{LockGrant, LockRequest, NamespaceLockBackend};
use rand::Rng;
use tokio::time::Instant;
use tracing::{Span, debug, field, instrument, warn};

use crate::handle::{DistributedGrant, Renewal};
use crate::peer::{LockArgs, LockPeer};
use crate::provider::DistributedBackendBuilder;
use crate::quorum::acquire::{QuorumRound, RoundGuard, acquire_quorum};
use crate::quorum::helper::QuorumHelper;
use crate::quorum::release::release_quorum;
use crate::quorum::timeouts::LeaseTimeouts;

pub(crate) async fn call_acquire(
    peer: Arc<dyn LockPeer>,
    mode: LockMode,
    args: LockArgs,
) -> LockResult<bool> {
    match mode {
        LockMode::Read => peer.rlock(args).await,
        LockMode::Write => peer.lock(args).await,
    }
}

pub(crate) async fn call_release(
    peer: Arc<dyn LockPeer>,
    mode: LockMode,
    args: LockArgs,
) -> LockResult<bool> {
    match mode {
        LockMode::Read => peer.runlock(args).await,
        LockMode::Write => peer.unlock(args).await,
    }
}

pub(crate) async fn call_refresh(peer: Arc<dyn LockPeer>, args: LockArgs) -> LockResult<bool> {
    peer.refresh(args).await
}

async fn call_force_unlock(peer: Arc<dyn LockPeer>, args: LockArgs) -> LockResult<bool> {
    peer.force_unlock(args).await
}

/// Backend that grants a lock only when a quorum of peers agrees.
///
/// Acquisition retries whole rounds with a randomized pause until the
/// acquire timeout passes, then fails with [`LockError::PeerUnavailable`]
/// if the last round could not even reach a quorum of peers, or with
/// [`LockError::Timeout`] otherwise. Local bookkeeping goes through the same
/// [`LockStateTable`] as the local backend.
#[derive(Debug, Clone)]
pub struct DistributedBackend {
    table: Arc<LockStateTable>,
    peers: Arc<[Arc<dyn LockPeer>]>,
    owner: String,
    timeouts: LeaseTimeouts,
    acquire_timeout: Duration,
    extension_cadence: Duration,
    retry_sleep_range: (Duration, Duration),
}

impl DistributedBackend {
    pub(crate) fn new(
        table: Arc<LockStateTable>,
        peers: Vec<Arc<dyn LockPeer>>,
        owner: String,
        timeouts: LeaseTimeouts,
        acquire_timeout: Duration,
        extension_cadence: Duration,
        retry_sleep_range: (Duration, Duration),
    ) -> Self {
        Self {
            table,
            peers: peers.into(),
            owner,
            timeouts,
            acquire_timeout,
            extension_cadence,
            retry_sleep_range,
        }
    }

    /// Returns a new builder for configuring the backend.
    pub fn builder() -> DistributedBackendBuilder {
        DistributedBackendBuilder::new()
    }

    pub fn peers(&self) -> &[Arc<dyn LockPeer>] {
        &self.peers
    }

    /// Node name sent to peers with every request.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }

    pub fn expiry(&self) -> Duration {
        self.timeouts.expiry
    }

    fn round_timeout(&self) -> Duration {
        self.timeouts.round_timeout()
    }

    fn lock_args(&self, request: &LockRequest) -> LockArgs {
        LockArgs {
            uid: QuorumHelper::create_lock_id(),
            resource: request.key.to_string(),
            owner: self.owner.clone(),
            source: request.source.clone(),
            ttl: self.timeouts.expiry,
        }
    }

    fn retry_sleep(&self) -> Duration {
        let (min, max) = self.retry_sleep_range;
        rand::thread_rng().gen_range(min..=max)
    }

    /// Runs one acquire round. Dropping the returned guard without keeping
    /// it releases whatever the round won.
    async fn acquire_round(
        &self,
        mode: LockMode,
        args: &LockArgs,
        quorum: usize,
        call_timeout: Duration,
    ) -> (QuorumRound, RoundGuard) {
        let acquire_args = args.clone();
        let release_args = args.clone();
        acquire_quorum(
            move |peer| call_acquire(peer, mode, acquire_args.clone()),
            move |peer| call_release(peer, mode, release_args.clone()),
            &self.peers,
            quorum,
            call_timeout,
        )
        .await
    }

    /// Releases `args` on `holders` from a background task.
    ///
    /// Outside a runtime nothing is sent and the leases expire on their own.
    fn spawn_release(&self, mode: LockMode, args: LockArgs, holders: Vec<bool>) {
        if !holders.iter().any(|&h| h) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(lock.resource = %args.resource, uid = %args.uid, "no runtime to release peers; leases will expire");
            return;
        };

        let peers = self.peers.clone();
        let call_timeout = self.round_timeout();
        runtime.spawn(async move {
            let release_args = args.clone();
            let result = release_quorum(
                move |peer| call_release(peer, mode, release_args.clone()),
                &peers,
                &holders,
                call_timeout,
            )
            .await;
            if let Err(e) = result {
                warn!(lock.resource = %args.resource, uid = %args.uid, error = %e, "failed to release lock on peers; leases will expire");
            }
        });
    }

    /// Turns a successful round into a grant.
    ///
    /// Returns `None` when the local bookkeeping refuses the grant; the
    /// round is then abandoned and the request stays blocked.
    fn complete(
        &self,
        request: &LockRequest,
        args: LockArgs,
        round: QuorumRound,
        guard: RoundGuard,
        quorum: usize,
        leased_at: Instant,
    ) -> Option<DistributedGrant> {
        if let Err(e) = self.table.grant(&request.key, &request.operation_id) {
            warn!(lock.resource = %request.key, uid = %args.uid, error = %e, "quorum granted a lock the local table refuses; releasing the round");
            return None;
        }
        guard.keep();
        Span::current().record("acquired", true);
        Span::current().record("peers_acquired", round.granted());
        debug!(operation_id = %request.operation_id, uid = %args.uid, "lock granted by quorum");

        Some(DistributedGrant::new(
            request.clone(),
            args,
            round.holders(),
            self.peers.clone(),
            Renewal {
                quorum,
                cadence: self.extension_cadence,
                call_timeout: self.round_timeout(),
                expiry: self.timeouts.expiry,
                leased_at,
            },
        ))
    }

    /// Drops every lease on `key` on all reachable peers.
    ///
    /// Local bookkeeping is untouched; this is for clearing leases left by
    /// a holder that will never release them. Fails if a majority of the
    /// peers could not be reached.
    #[instrument(skip(self), fields(lock.resource = %key, backend = "dsync"))]
    pub async fn force_unlock(&self, key: &ResourceKey) -> LockResult<()> {
        let args = LockArgs {
            uid: QuorumHelper::create_lock_id(),
            resource: key.to_string(),
            owner: self.owner.clone(),
            source: "force-unlock".to_string(),
            ttl: self.timeouts.expiry,
        };
        let targets = vec![true; self.peers.len()];
        release_quorum(
            move |peer| call_force_unlock(peer, args.clone()),
            &self.peers,
            &targets,
            self.round_timeout(),
        )
        .await
    }
}

impl NamespaceLockBackend for DistributedBackend {
    type Grant = DistributedGrant;

    fn name(&self) -> &'static str {
        "dsync"
    }

    fn table(&self) -> &Arc<LockStateTable> {
        &self.table
    }

    #[instrument(skip(self, request), fields(lock.volume = %request.key.volume(), lock.path = %request.key.path(), mode = %request.mode, backend = "dsync", peers = self.peers.len(), acquired = field::Empty, elapsed_ms = field::Empty, peers_acquired = field::Empty, error = field::Empty))]
    async fn acquire(&self, request: LockRequest) -> LockResult<Self::Grant> {
        let start = Instant::now();
        let wakeup = self.table.register(
            &request.key,
            LockEntry::blocked(&request.operation_id, request.mode, &request.source),
        )?;
        let pending = PendingEntry::new(&self.table, request.key.clone(), request.operation_id.clone());

        let quorum = QuorumHelper::quorum(request.mode, self.peers.len());
        let deadline = start + self.acquire_timeout;
        let mut last_reachable = self.peers.len();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            // Peers cannot see this node's queue; the local record decides
            // who asks them next.
            let notified = wakeup.notified();
            let mut notified = pin!(notified);
            notified.as_mut().enable();
            if !self.table.admits(&request.key, &request.operation_id)? {
                if tokio::time::timeout(remaining, notified).await.is_err() {
                    break;
                }
                continue;
            }

            // Fresh ID per round so a late release of the previous round
            // cannot remove this round's lease.
            let args = self.lock_args(&request);
            let round_started = Instant::now();
            let (round, guard) = self
                .acquire_round(request.mode, &args, quorum, remaining.min(self.round_timeout()))
                .await;

            if round.is_successful(quorum) {
                if let Some(grant) = self.complete(&request, args, round, guard, quorum, round_started) {
                    pending.disarm();
                    Span::current().record("elapsed_ms", start.elapsed().as_millis() as u64);
                    return Ok(grant);
                }
            } else {
                last_reachable = round.reachable();
                drop(guard);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(self.retry_sleep().min(remaining)).await;
        }

        drop(pending);
        let err = if last_reachable < quorum {
            LockError::PeerUnavailable {
                reachable: last_reachable,
                required: quorum,
            }
        } else {
            LockError::Timeout(self.acquire_timeout)
        };
        Span::current().record("acquired", false);
        Span::current().record("error", field::display(&err));
        debug!(operation_id = %request.operation_id, error = %err, "distributed lock acquisition failed");
        Err(err)
    }

    #[instrument(skip(self, request), fields(lock.volume = %request.key.volume(), lock.path = %request.key.path(), mode = %request.mode, backend = "dsync", peers = self.peers.len(), acquired = field::Empty, peers_acquired = field::Empty))]
    async fn try_acquire(&self, request: LockRequest) -> LockResult<Option<Self::Grant>> {
        self.table.register(
            &request.key,
            LockEntry::blocked(&request.operation_id, request.mode, &request.source),
        )?;
        let pending = PendingEntry::new(&self.table, request.key.clone(), request.operation_id.clone());

        if !self.table.admits(&request.key, &request.operation_id)? {
            Span::current().record("acquired", false);
            return Ok(None);
        }

        let quorum = QuorumHelper::quorum(request.mode, self.peers.len());
        let args = self.lock_args(&request);
        let round_started = Instant::now();
        let (round, guard) = self
            .acquire_round(
                request.mode,
                &args,
                quorum,
                self.round_timeout().min(self.acquire_timeout),
            )
            .await;

        if round.is_successful(quorum) {
            let grant = self.complete(&request, args, round, guard, quorum, round_started);
            if grant.is_some() {
                pending.disarm();
            }
            return Ok(grant);
        }

        drop(guard);
        drop(pending);
        Span::current().record("acquired", false);

        if round.reachable() < quorum {
            Err(LockError::PeerUnavailable {
                reachable: round.reachable(),
                required: quorum,
            })
        } else {
            Ok(None)
        }
    }

    fn release(&self, grant: Self::Grant) -> LockResult<()> {
        grant.stop_renewal();
        let result = self.table.release(grant.key(), grant.operation_id());
        self.spawn_release(grant.mode(), grant.args().clone(), grant.holders().to_vec());
        debug!(lock.resource = %grant.key(), mode = %grant.mode(), uid = %grant.lock_id(), backend = "dsync", "lock released");
        result.map(|_| ())
    }
}
