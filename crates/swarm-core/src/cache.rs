//! Persistent cache directory
//!
//! The backend keeps offline license-validation artifacts and session
//! metadata here. The launcher only manages the directory itself and never
//! deletes it.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::CacheError;

/// Directory name used under the base path
pub const DEFAULT_CACHE_DIR_NAME: &str = ".cache";

/// World-writable so the container's internal user can write regardless of uid mapping
pub const DEFAULT_CACHE_MODE: u32 = 0o777;

/// Outcome of a successful [`CacheStore::ensure`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheReady {
    pub path: PathBuf,
    /// True when this call created the directory
    pub created: bool,
}

/// Local cache directory mounted into the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    /// Cache store rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache store at `<base>/.cache`
    pub fn under(base: &Path) -> Self {
        Self::new(base.join(DEFAULT_CACHE_DIR_NAME))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Make sure the directory exists and is writable.
    ///
    /// Only the leaf directory is created; a missing parent is an error.
    /// Calling this on a directory that is already present is a no-op, and
    /// losing a creation race to another launcher counts as success.
    pub fn ensure(&self) -> Result<CacheReady, CacheError> {
        match fs::metadata(&self.root) {
            Ok(meta) if meta.is_dir() => {
                self.check_writable()?;
                debug!(path = %self.root.display(), "Cache directory already present");
                return Ok(self.ready(false));
            }
            Ok(_) => return Err(CacheError::NotADirectory(self.root.clone())),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(CacheError::io(&self.root, e)),
        }

        match fs::create_dir(&self.root) {
            Ok(()) => {
                self.apply_mode()?;
                info!("📁 Created cache directory {}", self.root.display());
                Ok(self.ready(true))
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists && self.root.is_dir() => {
                debug!(path = %self.root.display(), "Cache directory appeared concurrently");
                Ok(self.ready(false))
            }
            Err(e) => Err(CacheError::io(&self.root, e)),
        }
    }

    fn ready(&self, created: bool) -> CacheReady {
        CacheReady {
            path: self.root.clone(),
            created,
        }
    }

    /// Create and drop an anonymous file; the kernel decides for the current user
    fn check_writable(&self) -> Result<(), CacheError> {
        match tempfile::tempfile_in(&self.root) {
            Ok(_) => Ok(()),
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::PermissionDenied | ErrorKind::ReadOnlyFilesystem
                ) =>
            {
                Err(CacheError::NotWritable(self.root.clone()))
            }
            Err(e) => Err(CacheError::io(&self.root, e)),
        }
    }

    // create_dir is subject to the umask, so set the mode explicitly
    #[cfg(unix)]
    fn apply_mode(&self) -> Result<(), CacheError> {
        use std::os::unix::fs::PermissionsExt;

        fs::set_permissions(&self.root, fs::Permissions::from_mode(DEFAULT_CACHE_MODE))
            .map_err(|e| CacheError::io(&self.root, e))
    }

    #[cfg(not(unix))]
    fn apply_mode(&self) -> Result<(), CacheError> {
        Ok(())
    }
}
