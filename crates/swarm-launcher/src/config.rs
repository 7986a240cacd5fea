//! Launcher configuration
//!
//! Paths are resolved against an explicit base directory chosen once by the
//! binary, so nothing below `main` depends on the process working directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use swarm_core::{CacheStore, DEFAULT_CACHE_DIR_NAME, DEFAULT_LICENSE_PATH};

use crate::error::{LaunchError, Result};

/// Launcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LauncherConfig {
    /// Directory the cache and license paths are relative to
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Cache directory (relative paths resolve under `base_dir`)
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// License descriptor file (relative paths resolve under `base_dir`)
    #[serde(default = "default_license_file")]
    pub license_file: PathBuf,

    /// Container runtime binary
    #[serde(default = "default_runtime")]
    pub runtime: String,

    /// Seconds to wait after forwarding an interrupt before stopping the container
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
}

fn default_base_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CACHE_DIR_NAME)
}

fn default_license_file() -> PathBuf {
    PathBuf::from(DEFAULT_LICENSE_PATH)
}

fn default_runtime() -> String {
    "docker".to_string()
}

fn default_stop_grace_secs() -> u64 {
    10
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            cache_dir: default_cache_dir(),
            license_file: default_license_file(),
            runtime: default_runtime(),
            stop_grace_secs: default_stop_grace_secs(),
        }
    }
}

impl LauncherConfig {
    /// Config rooted at `base_dir` with default paths
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Default::default()
        }
    }

    /// Load a JSON config file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| LaunchError::config(format!("cannot read {}: {}", path.display(), e)))?;
        serde_json::from_str(&raw)
            .map_err(|e| LaunchError::config(format!("invalid config {}: {}", path.display(), e)))
    }

    /// Set base directory
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    /// Set cache directory
    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    /// Set license descriptor path
    pub fn with_license_file(mut self, license_file: impl Into<PathBuf>) -> Self {
        self.license_file = license_file.into();
        self
    }

    /// Set container runtime binary
    pub fn with_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = runtime.into();
        self
    }

    /// Set interrupt grace period
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace_secs = grace.as_secs();
        self
    }

    pub fn cache_path(&self) -> PathBuf {
        self.base_dir.join(&self.cache_dir)
    }

    pub fn license_path(&self) -> PathBuf {
        self.base_dir.join(&self.license_file)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn cache_store(&self) -> CacheStore {
        CacheStore::new(self.cache_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths() {
        let config = LauncherConfig::new("/work");
        assert_eq!(config.cache_path(), PathBuf::from("/work/.cache"));
        assert_eq!(config.license_path(), PathBuf::from("/work/settings/LicenseKey.json"));
        assert_eq!(config.runtime, "docker");
        assert_eq!(config.stop_grace(), Duration::from_secs(10));
    }

    #[test]
    fn test_absolute_override_ignores_base() {
        let config = LauncherConfig::new("/work")
            .with_cache_dir("/var/cache/swarm")
            .with_license_file("keys/license.json");
        assert_eq!(config.cache_path(), PathBuf::from("/var/cache/swarm"));
        assert_eq!(config.license_path(), PathBuf::from("/work/keys/license.json"));
    }

    #[test]
    fn test_from_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swarm.json");
        std::fs::write(&path, r#"{"runtime": "podman", "stop_grace_secs": 3}"#).unwrap();

        let config = LauncherConfig::from_file(&path).unwrap();
        assert_eq!(config.runtime, "podman");
        assert_eq!(config.stop_grace_secs, 3);
        assert_eq!(config.cache_dir, PathBuf::from(".cache"));
    }

    #[test]
    fn test_from_file_rejects_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swarm.json");
        std::fs::write(&path, r#"{"runtme": "podman"}"#).unwrap();

        let err = LauncherConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, LaunchError::Config(_)));
    }
}
