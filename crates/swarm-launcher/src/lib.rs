//! # SWARM Launcher
//!
//! Starts a local SWARM Core simulation backend inside a container runtime.
//!
//! ## Flow
//!
//! ```text
//! swarm run <backend>
//!   ├── CacheStore.ensure        (.cache, 0777, never deleted)
//!   ├── LicenseDescriptor.load   (settings/LicenseKey.json, Activated must be false)
//!   ├── LaunchSpec.build         (GPU, host network or published ports, mounts, env)
//!   └── ContainerRuntime.start   (docker create, then start --attach; exit code passed through)
//! ```
//!
//! See [`launcher`] for the state machine.

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod launcher;
pub mod runtime;

pub use config::LauncherConfig;
pub use error::{LaunchError, Result};
pub use launcher::{LaunchReport, LaunchRequest, LaunchState, Preflight, SessionLauncher};
pub use runtime::{DockerRuntime, DockerSession};
