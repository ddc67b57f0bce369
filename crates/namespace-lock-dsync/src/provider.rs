//! Distributed backend configuration.

use std::sync::Arc;
use std::time::Duration;

use namespace_lock_core::error::{LockError, LockResult};
use namespace_lock_core::table::LockStateTable;
use tracing::info;

use crate::lock::DistributedBackend;
use crate::peer::LockPeer;
use crate::quorum::timeouts::LeaseTimeouts;

/// Builder for the distributed backend.
pub struct DistributedBackendBuilder {
    peers: Vec<Arc<dyn LockPeer>>,
    owner: Option<String>,
    table: Option<Arc<LockStateTable>>,
    expiry: Duration,
    min_validity: Option<Duration>,
    extension_cadence: Option<Duration>,
    acquire_timeout: Duration,
    retry_sleep_range: (Duration, Duration),
}

impl DistributedBackendBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            peers: vec![],
            owner: None,
            table: None,
            expiry: Duration::from_secs(30),
            min_validity: None,
            extension_cadence: None,
            acquire_timeout: Duration::from_secs(5),
            retry_sleep_range: (Duration::from_millis(10), Duration::from_millis(200)),
        }
    }

    /// Adds a peer.
    ///
    /// Include this node's own lock server; an odd number of peers gives
    /// the best fault tolerance.
    pub fn peer(mut self, peer: Arc<dyn LockPeer>) -> Self {
        self.peers.push(peer);
        self
    }

    /// Adds multiple peers.
    pub fn peers(mut self, peers: impl IntoIterator<Item = Arc<dyn LockPeer>>) -> Self {
        self.peers.extend(peers);
        self
    }

    /// Sets the node name sent to peers.
    ///
    /// Default: `node-{pid}`
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Shares an existing lock state table.
    pub fn table(mut self, table: Arc<LockStateTable>) -> Self {
        self.table = Some(table);
        self
    }

    /// Sets the lease length granted by peers.
    ///
    /// Default: 30 seconds
    pub fn expiry(mut self, expiry: Duration) -> Self {
        self.expiry = expiry;
        self
    }

    /// Sets the minimum validity time.
    ///
    /// After acquiring, at least this much lease must remain. A single
    /// quorum round may therefore take at most `expiry - min_validity`.
    ///
    /// Default: 90% of expiry
    pub fn min_validity(mut self, validity: Duration) -> Self {
        self.min_validity = Some(validity);
        self
    }

    /// Sets how often held leases are renewed.
    ///
    /// Default: 1/3 of expiry
    pub fn extension_cadence(mut self, cadence: Duration) -> Self {
        self.extension_cadence = Some(cadence);
        self
    }

    /// Sets the bound on a whole acquisition, across retries.
    ///
    /// Default: 5 seconds
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Sets the range of the randomized pause between acquisition rounds.
    ///
    /// Default: 10-200ms
    pub fn retry_sleep_range(mut self, min: Duration, max: Duration) -> Self {
        self.retry_sleep_range = (min, max);
        self
    }

    /// Builds the backend.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Config`] if no peers are configured or the
    /// timing settings are inconsistent.
    pub fn build(self) -> LockResult<DistributedBackend> {
        if self.peers.is_empty() {
            return Err(LockError::Config("no lock peers provided".to_string()));
        }
        if self.expiry.is_zero() {
            return Err(LockError::Config("lease expiry must be non-zero".to_string()));
        }
        if self.acquire_timeout.is_zero() {
            return Err(LockError::Config("acquire timeout must be non-zero".to_string()));
        }

        let min_validity = self.min_validity.unwrap_or(self.expiry.mul_f64(0.9));
        if min_validity >= self.expiry {
            return Err(LockError::Config(format!(
                "min validity {min_validity:?} must be shorter than expiry {:?}",
                self.expiry
            )));
        }

        let extension_cadence = self.extension_cadence.unwrap_or(self.expiry / 3);
        if extension_cadence.is_zero() || extension_cadence >= self.expiry {
            return Err(LockError::Config(format!(
                "extension cadence {extension_cadence:?} must be non-zero and shorter than expiry {:?}",
                self.expiry
            )));
        }

        let (min_sleep, max_sleep) = self.retry_sleep_range;
        if min_sleep > max_sleep {
            return Err(LockError::Config(format!(
                "retry sleep range {min_sleep:?}..{max_sleep:?} is empty"
            )));
        }

        let owner = self
            .owner
            .unwrap_or_else(|| format!("node-{}", std::process::id()));

        info!(
            peers = self.peers.len(),
            %owner,
            expiry = ?self.expiry,
            acquire_timeout = ?self.acquire_timeout,
            "distributed lock backend configured"
        );

        Ok(DistributedBackend::new(
            self.table.unwrap_or_default(),
            self.peers,
            owner,
            LeaseTimeouts::new(self.expiry, min_validity),
            self.acquire_timeout,
            extension_cadence,
            self.retry_sleep_range,
        ))
    }
}

impl Default for DistributedBackendBuilder {
    fn default() -> Self {
        Self::new()
    }
}
