//! Namespace locking for object storage.
//!
//! Serializes concurrent access to `(volume, path)` resources with
//! reader-writer semantics, either within one process or across a set of
//! peers that must agree by quorum, and records every waiting and holding
//! request so that operators can see who holds what.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use namespace_lock::NamespaceLockManager;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = NamespaceLockManager::local();
//!
//!     let lock = manager.new_lock("bucket", "photos/cat.png")?;
//!     lock.rlock().await?;
//!
//!     // Everything on the volume, at any age
//!     for info in manager.list_locks("bucket", "", Duration::ZERO) {
//!         println!("{info}");
//!     }
//!
//!     lock.runlock()?;
//!     Ok(())
//! }
//! ```
//!
//! # Backends
//!
//! ## Local
//!
//! A write-preferring readers-writer lock per resource. Waiting is
//! unbounded.
//!
//! ## Distributed
//!
//! Quorum-based leases over a set of [`LockPeer`]s. Write locks need a
//! majority of peers, read locks enough peers to intersect every write
//! quorum. Acquisition gives up after the acquire timeout.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use namespace_lock::{LockServer, NamespaceLockManager};
//!
//! let manager = NamespaceLockManager::builder()
//!     .distributed(true)
//!     .peer(Arc::new(LockServer::new("node-1")))
//!     .peer(Arc::new(LockServer::new("node-2")))
//!     .peer(Arc::new(LockServer::new("node-3")))
//!     .build()?;
//! # Ok::<(), namespace_lock::LockError>(())
//! ```
//!
//! # Crate Organization
//!
//! This crate re-exports types from:
//! - `namespace-lock-core`: Keys, the lock state table, and backend traits
//! - `namespace-lock-local`: In-process backend
//! - `namespace-lock-dsync`: Quorum backend, peer trait, and lock server
//! - `namespace-lock-fs`: Filesystem helpers used under namespace locks

pub mod handle;
pub mod manager;

pub use handle::NamespaceLock;
pub use manager::{Backend, Grant, NamespaceLockManager, NamespaceLockManagerBuilder};

// Re-export core types and traits
pub use namespace_lock_core::*;

// Re-export distributed backend
#[allow(ambiguous_glob_reexports)]
pub use namespace_lock_dsync::*;

// Re-export local backend
#[allow(ambiguous_glob_reexports)]
pub use namespace_lock_local::*;

// Filesystem helpers keep their own error type
pub use namespace_lock_fs as fs;
