//! Docker container runtime
//!
//! Renders a [`LaunchSpec`] into `docker create` arguments, then runs the
//! container with `docker start --attach` in the foreground. Splitting the two
//! keeps runtime failures (no daemon, missing image) apart from the backend's
//! own exit code. Any binary with a docker-compatible CLI (podman, nerdctl)
//! can be substituted.

use async_trait::async_trait;
use std::future::Future;
use std::io::{ErrorKind, IsTerminal};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use swarm_core::{
    BackendHandle, ContainerRuntime, GpuRequirement, LaunchSpec, NetworkMode, RuntimeError,
};
use tokio::process::{Child, Command as AsyncCommand};
use tracing::{debug, info, warn};

/// Docker-compatible container runtime
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    /// Runtime binary
    binary: String,

    /// Wait after forwarding an interrupt before stopping the container
    stop_grace: Duration,

    /// Allocate a pseudo-TTY
    tty: bool,
}

impl DockerRuntime {
    /// Create a runtime using `binary`; a TTY is allocated when stdin is a terminal
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            stop_grace: Duration::from_secs(10),
            tty: std::io::stdin().is_terminal(),
        }
    }

    /// Set interrupt grace period
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Force TTY allocation on or off
    pub fn with_tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }

    /// Check if an NVIDIA GPU is visible on this host
    fn has_gpu() -> bool {
        std::path::Path::new("/dev/nvidia0").exists()
            || std::path::Path::new("/usr/bin/nvidia-smi").exists()
            || std::path::Path::new("/usr/local/bin/nvidia-smi").exists()
    }

    /// Build `create` arguments for a launch spec
    pub fn create_args(&self, spec: &LaunchSpec) -> Vec<String> {
        let mut args = vec!["create".to_string(), "--rm".to_string(), "-i".to_string()];
        if self.tty {
            args.push("-t".to_string());
        }

        args.push("--name".to_string());
        args.push(spec.container_name().to_string());

        if spec.gpu() == GpuRequirement::Required {
            args.push("--gpus".to_string());
            args.push("all".to_string());
        }

        match spec.network() {
            NetworkMode::Host => args.push("--net=host".to_string()),
            NetworkMode::Ports => {
                for port in spec.ports() {
                    args.push("-p".to_string());
                    args.push(format!("{0}:{0}/{1}", port.container_port, port.protocol));
                }
            }
        }

        for volume in spec.volumes() {
            args.push("-v".to_string());
            args.push(volume.to_string());
        }

        for (name, value) in spec.env() {
            args.push("-e".to_string());
            args.push(format!("{}={}", name, value));
        }

        args.push(spec.backend().to_string());
        args
    }

    /// Build `start` arguments attaching the terminal to a created container
    pub fn start_args(&self, container_name: &str) -> Vec<String> {
        vec![
            "start".to_string(),
            "--attach".to_string(),
            "--interactive".to_string(),
            container_name.to_string(),
        ]
    }

    fn spawn_error(&self, e: std::io::Error) -> RuntimeError {
        match e.kind() {
            ErrorKind::NotFound => RuntimeError::unavailable(format!(
                "`{}` not found; install it or pass --runtime",
                self.binary
            )),
            _ => RuntimeError::unavailable(format!("failed to start `{}`: {}", self.binary, e)),
        }
    }

    /// Create the container; its own stderr (pull progress, daemon errors) goes to the terminal
    async fn create(&self, spec: &LaunchSpec) -> swarm_core::Result<()> {
        let args = self.create_args(spec);
        info!("Container command: {} {}", self.binary, args.join(" "));

        let output = AsyncCommand::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            return Err(RuntimeError::unavailable(format!(
                "`{} create` exited with code {} before the backend ran",
                self.binary,
                exit_code(output.status)
            )));
        }

        let id = String::from_utf8_lossy(&output.stdout);
        debug!(container = %spec.container_name(), id = %id.trim(), "Container created");
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    type Handle = DockerSession;

    fn name(&self) -> &str {
        &self.binary
    }

    fn command_lines(&self, spec: &LaunchSpec) -> Vec<Vec<String>> {
        [self.create_args(spec), self.start_args(spec.container_name())]
            .into_iter()
            .map(|args| std::iter::once(self.binary.clone()).chain(args).collect())
            .collect()
    }

    async fn start(&self, spec: &LaunchSpec) -> swarm_core::Result<DockerSession> {
        if spec.gpu() == GpuRequirement::Required && !Self::has_gpu() {
            warn!("⚠️  No NVIDIA device detected; the runtime may refuse GPU access");
        }

        self.create(spec).await?;

        let name = spec.container_name().to_string();
        let args = self.start_args(&name);
        info!("Container command: {} {}", self.binary, args.join(" "));

        let child = match AsyncCommand::new(&self.binary)
            .args(&args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                let err = self.spawn_error(e);
                runtime_command(&self.binary, &["rm", "--force", &name]).await;
                return Err(err);
            }
        };

        Ok(DockerSession {
            child,
            binary: self.binary.clone(),
            container_name: name,
            stop_grace: self.stop_grace,
        })
    }
}

/// Run a short runtime command, logging rather than failing on error
async fn runtime_command(binary: &str, args: &[&str]) {
    match AsyncCommand::new(binary).args(args).output().await {
        Ok(output) if output.status.success() => {
            debug!("{} {} succeeded", binary, args.join(" "));
        }
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("{} {} failed: {}", binary, args.join(" "), stderr.trim());
        }
        Err(e) => warn!("Failed to run {} {}: {}", binary, args.join(" "), e),
    }
}

/// Foreground `docker start --attach` process
pub struct DockerSession {
    child: Child,
    binary: String,
    container_name: String,
    stop_grace: Duration,
}

impl DockerSession {
    /// Wait for the backend, forwarding the first interrupt from `interrupt`
    async fn wait_with_interrupt<F>(&mut self, interrupt: F) -> std::io::Result<ExitStatus>
    where
        F: Future<Output = std::io::Result<()>> + Send,
    {
        tokio::select! {
            status = self.child.wait() => status,
            received = interrupt => match received {
                Ok(()) => self.forward_interrupt().await,
                Err(e) => {
                    warn!("Cannot listen for interrupts, waiting without forwarding: {}", e);
                    self.child.wait().await
                }
            },
        }
    }

    /// Forward SIGINT to the container, then stop it if it outlives the grace period
    async fn forward_interrupt(&mut self) -> std::io::Result<ExitStatus> {
        let name = self.container_name.clone();
        warn!("🛑 Interrupt received, forwarding to container {}", name);
        runtime_command(&self.binary, &["kill", "--signal", "SIGINT", &name]).await;

        match tokio::time::timeout(self.stop_grace, self.child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                warn!("Container did not exit within {:?}, stopping {}", self.stop_grace, name);
                runtime_command(&self.binary, &["stop", &name]).await;
                self.child.wait().await
            }
        }
    }
}

#[async_trait]
impl BackendHandle for DockerSession {
    async fn wait(&mut self) -> swarm_core::Result<i32> {
        let status = self.wait_with_interrupt(tokio::signal::ctrl_c()).await?;
        Ok(exit_code(status))
    }
}

/// Exit code, or 128 + signal number when killed by a signal
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}
