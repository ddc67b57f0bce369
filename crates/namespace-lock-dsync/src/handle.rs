//! Distributed lock grant with background lease renewal.

use std::sync::Arc;
use std::time::Duration;

use namespace_lock_core::key::{LockMode, ResourceKey};
use namespace_lock_core::traits::{LockGrant, LockRequest};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::lock::call_refresh;
use crate::peer::{LockArgs, LockPeer};
use crate::quorum::extend::extend_quorum;

/// Timing for the renewal task.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Renewal {
    pub quorum: usize,
    pub cadence: Duration,
    pub call_timeout: Duration,
    pub expiry: Duration,
    /// When the winning round started; peers' leases run from no earlier.
    pub leased_at: Instant,
}

/// Grant for a lock held through a peer quorum.
///
/// The lease is renewed in the background while this grant exists. If
/// renewal loses quorum, or no renewal succeeds for a full lease period,
/// the lost token flips to `true`. Dropping the grant stops renewal and
/// lets the peers' leases expire.
#[derive(Debug)]
pub struct DistributedGrant {
    key: ResourceKey,
    mode: LockMode,
    operation_id: String,
    args: LockArgs,
    /// Peers that may hold the lease, indexed like the backend's peers.
    holders: Vec<bool>,
    lost_receiver: watch::Receiver<bool>,
    extension_task: tokio::task::JoinHandle<()>,
}

impl DistributedGrant {
    pub(crate) fn new(
        request: LockRequest,
        args: LockArgs,
        holders: Vec<bool>,
        peers: Arc<[Arc<dyn LockPeer>]>,
        renewal: Renewal,
    ) -> Self {
        let (lost_sender, lost_receiver) = watch::channel(false);

        let task_args = args.clone();
        let task_holders = holders.clone();
        let mode = request.mode;

        let extension_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(renewal.cadence);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately; the lease is fresh.
            interval.tick().await;
            let mut last_renewed = renewal.leased_at;

            loop {
                interval.tick().await;

                if lost_sender.is_closed() {
                    break;
                }

                // Peers extend from when they receive the call, which is
                // no earlier than this.
                let round_started = Instant::now();
                let args = task_args.clone();
                let renewed = extend_quorum(
                    move |peer| call_refresh(peer, args.clone()),
                    &peers,
                    &task_holders,
                    renewal.quorum,
                    renewal.call_timeout,
                )
                .await;

                match renewed {
                    Some(true) => {
                        last_renewed = round_started;
                    }
                    Some(false) => {
                        warn!(lock.resource = %task_args.resource, %mode, uid = %task_args.uid, "lease renewal lost quorum");
                        let _ = lost_sender.send(true);
                        break;
                    }
                    None if last_renewed.elapsed() >= renewal.expiry => {
                        warn!(lock.resource = %task_args.resource, %mode, uid = %task_args.uid, "lease expired without a successful renewal");
                        let _ = lost_sender.send(true);
                        break;
                    }
                    None => {
                        debug!(lock.resource = %task_args.resource, uid = %task_args.uid, "lease renewal inconclusive, retrying");
                    }
                }
            }
        });

        Self {
            key: request.key,
            mode: request.mode,
            operation_id: request.operation_id,
            args,
            holders,
            lost_receiver,
            extension_task,
        }
    }

    /// Unique ID of the winning acquisition round.
    pub fn lock_id(&self) -> &str {
        &self.args.uid
    }

    /// Number of peers that may hold the lease.
    pub fn holder_count(&self) -> usize {
        self.holders.iter().filter(|&&h| h).count()
    }

    pub(crate) fn args(&self) -> &LockArgs {
        &self.args
    }

    pub(crate) fn holders(&self) -> &[bool] {
        &self.holders
    }

    pub(crate) fn stop_renewal(&self) {
        self.extension_task.abort();
    }
}

impl LockGrant for DistributedGrant {
    fn key(&self) -> &ResourceKey {
        &self.key
    }

    fn mode(&self) -> LockMode {
        self.mode
    }

    fn operation_id(&self) -> &str {
        &self.operation_id
    }

    fn lost_token(&self) -> &watch::Receiver<bool> {
        &self.lost_receiver
    }
}

impl Drop for DistributedGrant {
    fn drop(&mut self) {
        // Peers are released by the backend; without that, leases expire.
        self.extension_task.abort();
    }
}
