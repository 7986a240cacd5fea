//! Launch specification for the simulation backend
//!
//! A [`LaunchSpec`] is the validated, immutable set of container runtime
//! parameters for one session: image, GPU access, networking, mounts and
//! environment. It is built fresh per launch and consumed once.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::SpecError;

/// Where the backend expects its cache inside the container
pub const CONTAINER_CACHE_PATH: &str = "/home/swarm/.cache";

/// Environment variable carrying the ROS bridge address
pub const ROS_BRIDGE_ENV: &str = "ROS_BRIDGE_IP";

/// Default container name when the caller does not assign one
pub const DEFAULT_CONTAINER_NAME: &str = "swarm-core";

/// Ports published in explicit port mode (API, web UI, notebook, TLS)
pub const DEFAULT_PUBLISHED_PORTS: [PortBinding; 4] = [
    PortBinding::tcp(5002),
    PortBinding::tcp(80),
    PortBinding::tcp(8888),
    PortBinding::tcp(443),
];

/// GPU access requested from the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuRequirement {
    None,
    #[default]
    Required,
}

/// How the backend's ports reach the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// Share the host network stack
    #[default]
    Host,
    /// Publish an explicit list of ports, for networks where host mode is blocked
    Ports,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

impl FromStr for Protocol {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            _ => Err(SpecError::parse("protocol", s)),
        }
    }
}

/// A container port published on the same host port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortBinding {
    pub container_port: u16,
    pub protocol: Protocol,
}

impl PortBinding {
    pub const fn tcp(container_port: u16) -> Self {
        Self {
            container_port,
            protocol: Protocol::Tcp,
        }
    }

    pub const fn udp(container_port: u16) -> Self {
        Self {
            container_port,
            protocol: Protocol::Udp,
        }
    }
}

impl fmt::Display for PortBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container_port, self.protocol)
    }
}

/// Parses `PORT` or `PORT/PROTO`; the protocol defaults to tcp
impl FromStr for PortBinding {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (port, protocol) = match s.split_once('/') {
            Some((port, proto)) => (port, proto.parse()?),
            None => (s, Protocol::Tcp),
        };
        let container_port = port
            .trim()
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| SpecError::parse("port binding", s))?;
        Ok(Self {
            container_port,
            protocol,
        })
    }
}

/// Host directory bound into the container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub host_path: PathBuf,
    pub container_path: String,
}

impl VolumeMount {
    pub fn new(host_path: impl Into<PathBuf>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
        }
    }
}

impl fmt::Display for VolumeMount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host_path.display(), self.container_path)
    }
}

/// Parses `HOST:CONTAINER`, splitting on the last colon
impl FromStr for VolumeMount {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once(':') {
            Some((host, container)) if !host.is_empty() && container.starts_with('/') => {
                Ok(Self::new(host, container))
            }
            _ => Err(SpecError::parse("volume mount", s)),
        }
    }
}

/// Caller adjustments on top of the launch defaults
#[derive(Debug, Clone, Default)]
pub struct LaunchOverrides {
    pub gpu: Option<GpuRequirement>,
    pub network: Option<NetworkMode>,
    /// Published in addition to [`DEFAULT_PUBLISHED_PORTS`] in port mode
    pub ports: Vec<PortBinding>,
    pub env: Vec<(String, String)>,
    pub volumes: Vec<VolumeMount>,
    pub ros_bridge_ip: Option<String>,
    pub container_name: Option<String>,
}

impl LaunchOverrides {
    pub fn with_gpu(mut self, gpu: GpuRequirement) -> Self {
        self.gpu = Some(gpu);
        self
    }

    pub fn with_network(mut self, network: NetworkMode) -> Self {
        self.network = Some(network);
        self
    }

    pub fn with_port(mut self, port: PortBinding) -> Self {
        self.ports.push(port);
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((name.into(), value.into()));
        self
    }

    pub fn with_volume(mut self, volume: VolumeMount) -> Self {
        self.volumes.push(volume);
        self
    }

    pub fn with_ros_bridge_ip(mut self, ip: impl Into<String>) -> Self {
        self.ros_bridge_ip = Some(ip.into());
        self
    }

    pub fn with_container_name(mut self, name: impl Into<String>) -> Self {
        self.container_name = Some(name.into());
        self
    }
}

/// Validated container runtime parameters for one launch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchSpec {
    backend: String,
    container_name: String,
    gpu: GpuRequirement,
    network: NetworkMode,
    ports: Vec<PortBinding>,
    volumes: Vec<VolumeMount>,
    env: BTreeMap<String, String>,
}

impl LaunchSpec {
    /// Build a spec for `backend` with the cache at `cache_path`.
    ///
    /// The cache mount is always the first volume. A blank or absent
    /// backend identifier is rejected rather than passed on to the runtime.
    pub fn build(
        backend: Option<&str>,
        cache_path: &Path,
        overrides: LaunchOverrides,
    ) -> Result<Self, SpecError> {
        let backend = backend
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .ok_or(SpecError::MissingBackendIdentifier)?
            .to_string();

        let network = overrides.network.unwrap_or_default();
        let ports = match network {
            NetworkMode::Host if !overrides.ports.is_empty() => {
                return Err(SpecError::PortsWithHostNetwork);
            }
            NetworkMode::Host => Vec::new(),
            NetworkMode::Ports => {
                let mut seen = HashSet::new();
                let mut ports = Vec::new();
                for binding in DEFAULT_PUBLISHED_PORTS.into_iter().chain(overrides.ports) {
                    if !seen.insert(binding) {
                        return Err(SpecError::DuplicatePortBinding(binding));
                    }
                    ports.push(binding);
                }
                ports
            }
        };

        let mut volumes = vec![VolumeMount::new(cache_path, CONTAINER_CACHE_PATH)];
        for volume in overrides.volumes {
            if volumes.iter().any(|v| v.container_path == volume.container_path) {
                return Err(SpecError::DuplicateMount(volume.container_path));
            }
            volumes.push(volume);
        }

        let mut env = BTreeMap::new();
        if let Some(ip) = overrides.ros_bridge_ip {
            ip.parse::<IpAddr>()
                .map_err(|_| SpecError::InvalidBridgeAddress(ip.clone()))?;
            env.insert(ROS_BRIDGE_ENV.to_string(), ip);
        }
        for (name, value) in overrides.env {
            validate_env_name(&name)?;
            if env.contains_key(&name) {
                return Err(SpecError::InvalidEnvironment(format!("`{name}` is set more than once")));
            }
            env.insert(name, value);
        }

        Ok(Self {
            backend,
            container_name: overrides
                .container_name
                .unwrap_or_else(|| DEFAULT_CONTAINER_NAME.to_string()),
            gpu: overrides.gpu.unwrap_or_default(),
            network,
            ports,
            volumes,
            env,
        })
    }

    /// Image reference, used verbatim
    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    pub fn gpu(&self) -> GpuRequirement {
        self.gpu
    }

    pub fn network(&self) -> NetworkMode {
        self.network
    }

    pub fn ports(&self) -> &[PortBinding] {
        &self.ports
    }

    pub fn volumes(&self) -> &[VolumeMount] {
        &self.volumes
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn cache_mount(&self) -> &VolumeMount {
        &self.volumes[0]
    }
}

/// Parses `NAME=VALUE` for environment overrides
pub fn parse_env_assignment(s: &str) -> Result<(String, String), SpecError> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| SpecError::InvalidEnvironment(format!("`{s}` is not NAME=VALUE")))?;
    validate_env_name(name)?;
    Ok((name.to_string(), value.to_string()))
}

fn validate_env_name(name: &str) -> Result<(), SpecError> {
    let valid = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SpecError::InvalidEnvironment(format!("`{name}` is not a valid name")))
    }
}
