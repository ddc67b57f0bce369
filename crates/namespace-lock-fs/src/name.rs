//! Path length validation.

use std::path::Path;

use crate::error::{FsError, FsResult};

/// Longest accepted path, in bytes.
const MAX_PATH_LENGTH: usize = 1024;

/// Longest accepted single path component, in bytes.
const MAX_COMPONENT_LENGTH: usize = 255;

/// Rejects empty paths and paths that exceed portable length limits.
///
/// # Rules
///
/// - The whole path may be at most 1024 bytes
/// - Each component may be at most 255 bytes
pub fn check_path_length(path: &Path) -> FsResult<()> {
    let raw = path.as_os_str();
    if raw.is_empty() {
        return Err(FsError::InvalidArgument("path cannot be empty".to_string()));
    }
    if raw.len() > MAX_PATH_LENGTH {
        return Err(FsError::FileNameTooLong);
    }
    if path
        .components()
        .any(|c| c.as_os_str().len() > MAX_COMPONENT_LENGTH)
    {
        return Err(FsError::FileNameTooLong);
    }
    Ok(())
}
