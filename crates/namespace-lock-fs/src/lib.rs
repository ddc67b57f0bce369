//! Filesystem helpers for an object-storage backend.
//!
//! These functions perform the actual create/rename/delete work on a
//! volume. They take no locks themselves: callers must hold at least a
//! shared namespace lock on the affected (volume, path) for mutating
//! calls, and an exclusive lock for destructive ones such as
//! [`delete_file`] or a rename onto the final object name.

pub mod error;
pub mod helpers;
pub mod name;

pub use error::{FsError, FsResult};
pub use helpers::{
    MAX_DELETE_DEPTH, create_file, delete_file, mkdir, open_file, remove_all, remove_dir,
    remove_file, remove_upload_id_path, rename_file, stat_dir, stat_file,
};
pub use name::check_path_length;
