//! Convenience prelude for namespace lock types.

pub use crate::error::{LockError, LockResult};
pub use crate::info::{LockInfo, LockStatus, LockSummary};
pub use crate::key::{LockMode, ResourceKey};
pub use crate::table::LockStateTable;
pub use crate::traits::{LockGrant, LockRequest, NamespaceLockBackend};
