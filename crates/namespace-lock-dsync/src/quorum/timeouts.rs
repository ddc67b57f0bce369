//! Lease timeout calculations.

use std::time::Duration;

/// Timeout configuration for leased quorum locks.
///
/// A quorum round may take at most `expiry - min_validity`, so that a lock
/// granted at the end of a round still has at least `min_validity` of lease
/// left.
#[derive(Debug, Clone)]
pub struct LeaseTimeouts {
    /// Lease length set on each peer.
    pub expiry: Duration,
    /// Minimum validity time required after acquisition.
    ///
    /// This accounts for clock drift between peers.
    pub min_validity: Duration,
}

impl LeaseTimeouts {
    pub fn new(expiry: Duration, min_validity: Duration) -> Self {
        Self {
            expiry,
            min_validity,
        }
    }

    /// The longest a single peer call in a quorum round may take.
    ///
    /// Zero when `min_validity` is not shorter than `expiry`; the builder
    /// rejects such settings.
    pub fn round_timeout(&self) -> Duration {
        self.expiry.saturating_sub(self.min_validity)
    }
}
