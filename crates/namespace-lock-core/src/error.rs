//! Error types for namespace lock operations.

use std::time::Duration;
use thiserror::Error;

use crate::key::LockMode;

/// Errors that can occur during lock operations.
#[derive(Error, Debug)]
pub enum LockError {
    /// Empty or malformed resource key.
    #[error("invalid resource: {0}")]
    InvalidResource(String),

    /// Quorum was not reached before the acquisition deadline.
    #[error("lock acquisition timed out after {0:?}")]
    Timeout(Duration),

    /// Too few peers answered to ever form a quorum.
    #[error("insufficient reachable peers: {reachable} reachable, {required} required")]
    PeerUnavailable {
        /// Peers that answered in the last acquisition round.
        reachable: usize,
        /// Peers needed for quorum.
        required: usize,
    },

    /// Release requested for a lock the handle does not hold.
    #[error("{mode} lock on {volume}/{path} is not held")]
    NotHeld {
        volume: String,
        path: String,
        mode: LockMode,
    },

    /// Lock bookkeeping was found in an impossible state.
    #[error("lock state invariant violated: {0}")]
    InvariantViolation(String),

    /// Lock operation was cancelled.
    #[error("lock operation was cancelled")]
    Cancelled,

    /// Lock was lost after acquisition (e.g., lease renewal lost quorum).
    #[error("lock was lost: {0}")]
    LockLost(String),

    /// Unusable manager or backend configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Peer transport failed.
    #[error("connection error: {0}")]
    Connection(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Backend-specific error.
    #[error("backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl LockError {
    /// Whether the caller may reasonably retry the same acquisition.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::PeerUnavailable { .. })
    }
}

/// Result type for lock operations.
pub type LockResult<T> = Result<T, LockError>;
