//! Error types for the launcher

use swarm_core::{CacheError, LicenseError, RuntimeError, SpecError};
use thiserror::Error;

use crate::launcher::LaunchState;

/// Launcher result type
pub type Result<T> = std::result::Result<T, LaunchError>;

/// Errors that can end a launch
#[derive(Error, Debug)]
pub enum LaunchError {
    /// Cache directory could not be prepared
    #[error("cache directory unavailable: {0}")]
    Cache(#[from] CacheError),

    /// License descriptor failed validation
    #[error("{0}")]
    License(#[from] LicenseError),

    /// Launch parameters failed validation
    #[error("{0}")]
    Spec(#[from] SpecError),

    /// Container runtime binary, daemon or GPU unavailable
    #[error("{0}")]
    RuntimeUnavailable(#[from] RuntimeError),

    /// Backend ran and exited with a nonzero code
    #[error("backend exited with code {0}")]
    BackendExit(i32),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl LaunchError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Stage in which this error is raised
    pub fn stage(&self) -> LaunchState {
        match self {
            LaunchError::Config(_) => LaunchState::Idle,
            LaunchError::Cache(_) => LaunchState::CacheVerifying,
            LaunchError::License(_) => LaunchState::LicenseValidating,
            LaunchError::Spec(_) => LaunchState::SpecBuilding,
            LaunchError::RuntimeUnavailable(_) => LaunchState::Launching,
            LaunchError::BackendExit(_) => LaunchState::Running,
        }
    }

    /// Process exit status for this error.
    ///
    /// Backend exit codes pass through unchanged; every launcher-side
    /// failure is 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            LaunchError::BackendExit(code) => *code,
            _ => 1,
        }
    }
}
