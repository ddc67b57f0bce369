//! Resource keys and lock modes.

use std::fmt;

use crate::error::{LockError, LockResult};

/// Identifies a lockable resource: a volume (bucket) and a path inside it.
///
/// Equality is exact string equality. No normalization is applied, so
/// `"a/b"` and `"a//b"` are different resources.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    volume: String,
    path: String,
}

impl ResourceKey {
    /// Creates a key, rejecting empty components, embedded NUL bytes and a
    /// `/` in the volume.
    ///
    /// The volume never contains `/`, so the `volume/path` form sent to
    /// peers identifies exactly one key.
    pub fn new(volume: impl Into<String>, path: impl Into<String>) -> LockResult<Self> {
        let volume = volume.into();
        let path = path.into();

        if volume.is_empty() {
            return Err(LockError::InvalidResource("volume cannot be empty".to_string()));
        }
        if path.is_empty() {
            return Err(LockError::InvalidResource(format!(
                "path cannot be empty (volume '{volume}')"
            )));
        }
        if volume.contains('/') {
            return Err(LockError::InvalidResource(format!(
                "volume '{volume}' cannot contain '/'"
            )));
        }
        if volume.contains('\0') || path.contains('\0') {
            return Err(LockError::InvalidResource(format!(
                "resource '{volume}/{path}' contains a NUL byte"
            )));
        }

        Ok(Self { volume, path })
    }

    pub fn volume(&self) -> &str {
        &self.volume
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether this key lies in `volume` under the literal string `prefix`.
    pub fn matches(&self, volume: &str, prefix: &str) -> bool {
        self.volume == volume && self.path.starts_with(prefix)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.volume, self.path)
    }
}

/// Access level requested on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Shared access; any number of concurrent holders.
    Read,
    /// Exclusive access; a single holder and no readers.
    Write,
}

impl LockMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockMode::Read => "read",
            LockMode::Write => "write",
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_components() {
        assert!(matches!(
            ResourceKey::new("", "object"),
            Err(LockError::InvalidResource(_))
        ));
        assert!(matches!(
            ResourceKey::new("bucket", ""),
            Err(LockError::InvalidResource(_))
        ));
        assert!(matches!(
            ResourceKey::new("bucket", "obj\0ect"),
            Err(LockError::InvalidResource(_))
        ));
    }

    #[test]
    fn test_volume_with_separator_is_rejected() {
        // Otherwise ("a/b", "c") and ("a", "b/c") would both be "a/b/c".
        assert!(matches!(
            ResourceKey::new("a/b", "c"),
            Err(LockError::InvalidResource(_))
        ));
        let key = ResourceKey::new("a", "b/c").unwrap();
        assert_eq!(key.to_string(), "a/b/c");
    }

    #[test]
    fn test_exact_equality() {
        let a = ResourceKey::new("bucket", "a/b").unwrap();
        let b = ResourceKey::new("bucket", "a//b").unwrap();
        assert_ne!(a, b);
        assert_eq!(a, ResourceKey::new("bucket", "a/b").unwrap());
        assert_eq!(a.to_string(), "bucket/a/b");
    }

    #[test]
    fn test_prefix_match_is_literal() {
        let key = ResourceKey::new("bucket1", "prefix1/obj1").unwrap();
        assert!(key.matches("bucket1", "prefix1"));
        assert!(key.matches("bucket1", ""));
        assert!(!key.matches("bucket1", "prefix11"));
        assert!(!key.matches("bucket1", "prefix*"));
        assert!(!key.matches("bucket", "prefix1"));
    }
}
