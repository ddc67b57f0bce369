//! In-process backend for namespace locks.
//!
//! Implements a write-preferring readers-writer lock directly over the
//! shared lock state table. Acquisition has no timeout: a caller waits until
//! the lock is grantable.

pub mod handle;
pub mod lock;

pub use handle::LocalGrant;
pub use lock::LocalBackend;
