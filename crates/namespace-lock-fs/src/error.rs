//! Storage error types.

use thiserror::Error;

/// Errors returned by the filesystem helpers.
#[derive(Error, Debug)]
pub enum FsError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("file not found")]
    FileNotFound,

    #[error("file access denied")]
    FileAccessDenied,

    #[error("volume not found")]
    VolumeNotFound,

    #[error("volume is not empty")]
    VolumeNotEmpty,

    #[error("volume already exists")]
    VolumeExists,

    #[error("volume access denied")]
    VolumeAccessDenied,

    #[error("disk access denied")]
    DiskAccessDenied,

    #[error("file name too long")]
    FileNameTooLong,

    #[error("not a regular file")]
    IsNotRegular,

    /// Ancestor cleanup walked further than allowed.
    #[error("delete walk exceeded {0} levels")]
    DepthExceeded(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for filesystem helpers.
pub type FsResult<T> = Result<T, FsError>;
