//! Container runtime interface
//!
//! The launcher talks to the container engine through these traits only.
//! Docker is the production implementation; tests plug in a recorder.

use async_trait::async_trait;

use crate::error::RuntimeError;
use crate::spec::LaunchSpec;

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// A container engine able to run a [`LaunchSpec`] in the foreground
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Handle to a started backend
    type Handle: BackendHandle;

    /// Runtime name for diagnostics (e.g. "docker")
    fn name(&self) -> &str;

    /// Command lines the runtime executes for `spec`, in order
    fn command_lines(&self, spec: &LaunchSpec) -> Vec<Vec<String>>;

    /// Start the backend. Returns once the process has been handed off.
    ///
    /// Any failure of the runtime itself must surface here, so that an exit
    /// code later reported by [`BackendHandle::wait`] always belongs to the
    /// backend.
    async fn start(&self, spec: &LaunchSpec) -> Result<Self::Handle>;
}

/// A running backend session
#[async_trait]
pub trait BackendHandle: Send {
    /// Block until the backend exits and return its exit code.
    ///
    /// Implementations forward an interrupt received while waiting to the
    /// backend instead of abandoning it.
    async fn wait(&mut self) -> Result<i32>;
}
