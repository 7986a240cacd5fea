//! SWARM Core - Shared launcher types
//!
//! This crate defines the pieces a simulation session needs before the
//! backend container can start:
//! - CacheStore (persistent cache directory mounted into the backend)
//! - LicenseDescriptor (local shape checks on the license key file)
//! - LaunchSpec (validated container runtime parameters)
//! - ContainerRuntime trait (interface for container engines)

pub mod cache;
pub mod error;
pub mod license;
pub mod spec;
pub mod traits;

pub use cache::*;
pub use error::*;
pub use license::*;
pub use spec::*;
pub use traits::*;
