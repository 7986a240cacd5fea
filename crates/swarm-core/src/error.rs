//! Error types for SWARM launcher components
//!
//! Each component owns its own error enum so the launcher can tag a failure
//! with the stage that produced it.

use std::path::PathBuf;
use thiserror::Error;

use crate::spec::PortBinding;

/// Cache directory could not be made ready
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("{0} exists but is not a directory")]
    NotADirectory(PathBuf),

    #[error("{0} is not writable")]
    NotWritable(PathBuf),

    #[error("cannot prepare {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// License descriptor failed its local shape checks
#[derive(Error, Debug)]
pub enum LicenseError {
    #[error("license file not found at {0}")]
    NotFound(PathBuf),

    #[error("cannot read license file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed license descriptor: {0}")]
    MalformedDescriptor(String),

    #[error("license descriptor is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("license descriptor has `Activated: true`; activation is performed by the backend, set it back to false")]
    PrematureActivation,
}

impl LicenseError {
    /// Create a malformed descriptor error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedDescriptor(msg.into())
    }
}

/// Launch parameters failed validation
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SpecError {
    #[error("no backend identifier given; usage: swarm run <backend-identifier> [ros-bridge-ip]")]
    MissingBackendIdentifier,

    #[error("port binding {0} is listed more than once")]
    DuplicatePortBinding(PortBinding),

    #[error("port bindings require the explicit port network mode, not host networking")]
    PortsWithHostNetwork,

    #[error("invalid environment variable: {0}")]
    InvalidEnvironment(String),

    #[error("invalid ROS bridge address `{0}`")]
    InvalidBridgeAddress(String),

    #[error("container path {0} is mounted more than once")]
    DuplicateMount(String),

    #[error("invalid {kind} `{value}`")]
    Parse { kind: &'static str, value: String },
}

impl SpecError {
    pub(crate) fn parse(kind: &'static str, value: impl Into<String>) -> Self {
        Self::Parse {
            kind,
            value: value.into(),
        }
    }
}

/// Container runtime failed to start or run the backend
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    /// Create a runtime-unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}
