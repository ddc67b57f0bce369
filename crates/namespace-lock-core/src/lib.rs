//! Core traits and types for namespace locks.

pub mod error;
pub mod info;
pub mod key;
pub mod prelude;
pub mod table;
pub mod traits;

pub use error::{LockError, LockResult};
pub use info::LockEntry;
pub use prelude::*;
pub use table::{PendingEntry, RecordState};
