//! File and directory operations performed under a namespace lock.

use std::fs::{self, File, Metadata, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::debug;

use crate::error::{FsError, FsResult};
use crate::name::check_path_length;

/// Most ancestor directories [`delete_file`] will visit.
pub const MAX_DELETE_DEPTH: usize = 256;

/// Removes the file at `path`, leaving its parents alone.
pub fn remove_file(path: &Path) -> FsResult<()> {
    check_path_length(path)?;
    fs::remove_file(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => FsError::FileNotFound,
        ErrorKind::PermissionDenied => FsError::FileAccessDenied,
        _ => FsError::Io(e),
    })
}

/// Removes `dir` and everything below it. A missing directory is not an error.
pub fn remove_all(dir: &Path) -> FsResult<()> {
    check_path_length(dir)?;
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) if e.kind() == ErrorKind::PermissionDenied => Err(FsError::VolumeAccessDenied),
        Err(e) => Err(FsError::Io(e)),
    }
}

/// Removes `dir` only if it is empty.
pub fn remove_dir(dir: &Path) -> FsResult<()> {
    check_path_length(dir)?;
    fs::remove_dir(dir).map_err(|e| match e.kind() {
        ErrorKind::NotFound => FsError::VolumeNotFound,
        ErrorKind::DirectoryNotEmpty => FsError::VolumeNotEmpty,
        _ => FsError::Io(e),
    })
}

/// Creates `dir`; its parent must exist and `dir` must not.
pub fn mkdir(dir: &Path) -> FsResult<()> {
    check_path_length(dir)?;
    fs::create_dir(dir).map_err(|e| match e.kind() {
        ErrorKind::AlreadyExists => FsError::VolumeExists,
        // A missing parent, or a parent that is a file.
        ErrorKind::PermissionDenied | ErrorKind::NotADirectory | ErrorKind::NotFound => {
            FsError::DiskAccessDenied
        }
        _ => FsError::Io(e),
    })
}

/// Returns the metadata of `dir`, which must be a directory.
pub fn stat_dir(dir: &Path) -> FsResult<Metadata> {
    check_path_length(dir)?;
    let meta = fs::metadata(dir).map_err(|e| match e.kind() {
        ErrorKind::NotFound => FsError::VolumeNotFound,
        ErrorKind::PermissionDenied => FsError::VolumeAccessDenied,
        _ => FsError::Io(e),
    })?;
    if !meta.is_dir() {
        return Err(FsError::VolumeAccessDenied);
    }
    Ok(meta)
}

/// Returns the metadata of `path`, which must not be a directory.
pub fn stat_file(path: &Path) -> FsResult<Metadata> {
    check_path_length(path)?;
    let meta = fs::metadata(path).map_err(stat_file_error)?;
    if meta.is_dir() {
        return Err(FsError::FileNotFound);
    }
    Ok(meta)
}

fn stat_file_error(e: std::io::Error) -> FsError {
    match e.kind() {
        ErrorKind::NotFound => FsError::FileNotFound,
        // One of the parents is a file.
        ErrorKind::PermissionDenied | ErrorKind::NotADirectory => FsError::FileAccessDenied,
        _ => FsError::Io(e),
    }
}

/// Opens a regular file for reading, positioned at `offset`.
///
/// Returns the file and its total size.
pub fn open_file(path: &Path, offset: u64) -> FsResult<(File, u64)> {
    check_path_length(path)?;
    let mut file = File::open(path).map_err(stat_file_error)?;

    let meta = file.metadata()?;
    if !meta.is_file() {
        return Err(FsError::IsNotRegular);
    }

    if offset > 0 {
        file.seek(SeekFrom::Start(offset))?;
    }
    Ok((file, meta.len()))
}

/// Creates `path` (and any missing parents) and copies `reader` into it
/// through `buf`. Returns the number of bytes written.
pub fn create_file(path: &Path, reader: &mut impl Read, buf: &mut [u8]) -> FsResult<u64> {
    if buf.is_empty() {
        return Err(FsError::InvalidArgument("copy buffer cannot be empty".to_string()));
    }
    check_path_length(path)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| match e.kind() {
            ErrorKind::NotADirectory | ErrorKind::AlreadyExists => FsError::FileAccessDenied,
            _ => FsError::Io(e),
        })?;
    }

    let mut writer = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|e| match e.kind() {
            ErrorKind::NotADirectory => FsError::FileAccessDenied,
            _ => FsError::Io(e),
        })?;

    let mut written = 0u64;
    loop {
        let n = match reader.read(buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(FsError::Io(e)),
        };
        writer.write_all(&buf[..n])?;
        written += n as u64;
    }
    writer.flush()?;
    Ok(written)
}

/// Renames `source` to `dest`, creating missing parents of `dest`.
pub fn rename_file(source: &Path, dest: &Path) -> FsResult<()> {
    check_path_length(source)?;
    check_path_length(dest)?;
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::rename(source, dest).map_err(|e| match e.kind() {
        ErrorKind::NotFound => FsError::FileNotFound,
        ErrorKind::PermissionDenied => FsError::FileAccessDenied,
        _ => FsError::Io(e),
    })
}

/// Deletes `path`, then every ancestor that became empty, up to but not
/// including `base`.
///
/// A non-empty directory at `path` is left in place without error. The
/// walk stops at the first non-empty ancestor and never climbs more than
/// [`MAX_DELETE_DEPTH`] levels.
pub fn delete_file(base: &Path, path: &Path) -> FsResult<()> {
    check_path_length(base)?;
    check_path_length(path)?;
    if !path.starts_with(base) {
        return Err(FsError::InvalidArgument(format!(
            "{} is not below {}",
            path.display(),
            base.display()
        )));
    }

    let mut current = path;
    for depth in 0..MAX_DELETE_DEPTH {
        if current == base {
            return Ok(());
        }

        let meta = fs::metadata(current).map_err(|e| match e.kind() {
            ErrorKind::NotFound => FsError::FileNotFound,
            ErrorKind::PermissionDenied => FsError::FileAccessDenied,
            _ => FsError::Io(e),
        })?;

        let removed = if meta.is_dir() {
            if !is_dir_empty(current)? {
                return Ok(());
            }
            fs::remove_dir(current)
        } else {
            fs::remove_file(current)
        };

        match removed {
            Ok(()) => debug!(path = %current.display(), depth, "deleted"),
            // A concurrent writer refilled an ancestor; leave it.
            Err(e) if depth > 0 && e.kind() == ErrorKind::DirectoryNotEmpty => return Ok(()),
            Err(e) => {
                return Err(match e.kind() {
                    ErrorKind::NotFound => FsError::FileNotFound,
                    ErrorKind::PermissionDenied => FsError::FileAccessDenied,
                    ErrorKind::DirectoryNotEmpty => FsError::VolumeNotEmpty,
                    _ => FsError::Io(e),
                });
            }
        }

        match current.parent() {
            Some(parent) => current = parent,
            None => return Ok(()),
        }
    }

    Err(FsError::DepthExceeded(MAX_DELETE_DEPTH))
}

/// Deletes every entry of a multipart upload directory, cleaning up
/// emptied parents below `base`.
pub fn remove_upload_id_path(base: &Path, upload_dir: &Path) -> FsResult<()> {
    check_path_length(base)?;
    check_path_length(upload_dir)?;

    let entries = match fs::read_dir(upload_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(FsError::Io(e)),
    };

    for entry in entries {
        match delete_file(base, &entry?.path()) {
            Ok(()) | Err(FsError::FileNotFound) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn is_dir_empty(dir: &Path) -> FsResult<bool> {
    Ok(fs::read_dir(dir)?.next().is_none())
}
