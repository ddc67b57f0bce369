//! Quorum-based distributed backend for namespace locks.
//!
//! Every lock request is sent to all peers that jointly own the namespace.
//! A write lock needs `N/2 + 1` grants, a read lock `N - (N/2 + 1) + 1`, so
//! every read quorum intersects every write quorum and two writers can
//! never both reach quorum. Grants are leases: held locks are renewed in
//! the background and peers reclaim leases that are not renewed.

pub mod handle;
pub mod lock;
pub mod peer;
pub mod provider;
pub mod quorum;
pub mod server;

pub use handle::DistributedGrant;
pub use lock::DistributedBackend;
pub use peer::{LockArgs, LockPeer, PeerFuture};
pub use provider::DistributedBackendBuilder;
pub use quorum::{PeerOutcome, QuorumHelper, QuorumRound, RoundGuard};
pub use server::LockServer;
