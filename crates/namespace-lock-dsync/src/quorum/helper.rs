//! Quorum helper functions.

use std::process;

use namespace_lock_core::key::LockMode;
use uuid::Uuid;

/// Helper functions for quorum decisions.
pub struct QuorumHelper;

impl QuorumHelper {
    /// Grants needed for a write lock: a strict majority, `N/2 + 1`.
    pub fn write_quorum(peer_count: usize) -> usize {
        peer_count / 2 + 1
    }

    /// Grants needed for a read lock: the smallest count that still
    /// intersects every write quorum, `N - W + 1`.
    pub fn read_quorum(peer_count: usize) -> usize {
        (peer_count + 1) - Self::write_quorum(peer_count)
    }

    pub fn quorum(mode: LockMode, peer_count: usize) -> usize {
        match mode {
            LockMode::Read => Self::read_quorum(peer_count),
            LockMode::Write => Self::write_quorum(peer_count),
        }
    }

    pub fn has_sufficient_successes(success_count: usize, quorum: usize) -> bool {
        success_count >= quorum
    }

    /// Checks if we have too many failures/faults to ever reach `quorum`.
    pub fn has_too_many_failures_or_faults(
        failure_or_fault_count: usize,
        quorum: usize,
        peer_count: usize,
    ) -> bool {
        failure_or_fault_count > peer_count.saturating_sub(quorum)
    }

    /// Generates a unique lock ID, `{process_id}_{uuid}`.
    pub fn create_lock_id() -> String {
        format!("{}_{}", process::id(), Uuid::new_v4().simple())
    }
}
