//! Quorum rounds across lock peers: acquire, extend and release.

pub mod acquire;
pub mod extend;
pub mod helper;
pub mod release;
pub mod timeouts;

pub use acquire::{PeerOutcome, QuorumRound, RoundGuard};
pub use helper::QuorumHelper;
pub use timeouts::LeaseTimeouts;
