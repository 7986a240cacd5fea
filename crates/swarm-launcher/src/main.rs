//! SWARM - local simulation backend launcher
//!
//! ## Usage
//!
//! ```bash
//! # Launch the backend (GPU, host networking, .cache mounted)
//! swarm run swarm_home_v1.5.0
//!
//! # Bridge to a ROS endpoint
//! swarm run swarm_home_v1.5.0 192.168.1.20
//!
//! # Restricted networks: publish 5002, 80, 8888 and 443 instead of host networking
//! swarm run swarm_home_v1.5.0 --ports
//!
//! # Show the container commands without running them
//! swarm run swarm_home_v1.5.0 --dry-run
//!
//! # Check the cache directory and license file only; nothing is launched
//! swarm check
//! ```
//!
//! Exit status is 0 on a clean backend exit, 1 for any launcher-side
//! failure, otherwise the backend's own exit code.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use swarm_core::{
    parse_env_assignment, GpuRequirement, LaunchOverrides, NetworkMode, PortBinding, VolumeMount,
};
use swarm_launcher::{DockerRuntime, LaunchError, LaunchRequest, LauncherConfig, SessionLauncher};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// SWARM: local launcher for the SWARM Core simulation backend
#[derive(Parser)]
#[command(name = "swarm", version)]
#[command(about = "Prepare the cache and license, then run the SWARM Core container", long_about = None)]
struct Cli {
    /// Directory holding .cache and settings/ (default: current directory)
    #[arg(long, global = true, env = "SWARM_BASE_DIR")]
    base_dir: Option<PathBuf>,

    /// License descriptor file (default: settings/LicenseKey.json)
    #[arg(long, global = true, env = "SWARM_LICENSE_FILE")]
    license: Option<PathBuf>,

    /// Cache directory (default: .cache)
    #[arg(long, global = true, env = "SWARM_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Container runtime binary (default: docker)
    #[arg(long, global = true, env = "SWARM_CONTAINER_RUNTIME")]
    runtime: Option<String>,

    /// JSON config file; flags and environment take precedence
    #[arg(long, global = true, env = "SWARM_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds to wait after forwarding Ctrl+C before stopping the container (default: 10)
    #[arg(long, global = true, env = "SWARM_STOP_GRACE", value_name = "SECS")]
    stop_grace: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the simulation backend in the foreground
    Run {
        /// Backend image, e.g. swarm_home_v1.5.0
        backend: Option<String>,

        /// ROS bridge IP address passed to the backend
        ros_bridge_ip: Option<String>,

        /// Publish 5002, 80, 8888 and 443 instead of using host networking
        #[arg(long)]
        ports: bool,

        /// Extra published port (implies --ports)
        #[arg(long = "publish", value_name = "PORT[/PROTO]")]
        publish: Vec<PortBinding>,

        /// Run without GPU access
        #[arg(long)]
        no_gpu: bool,

        /// Extra environment variable
        #[arg(long = "env", value_name = "NAME=VALUE", value_parser = parse_env_assignment)]
        env: Vec<(String, String)>,

        /// Extra volume mount
        #[arg(long = "volume", value_name = "HOST:CONTAINER")]
        volumes: Vec<VolumeMount>,

        /// Print the container commands instead of running them
        #[arg(long)]
        dry_run: bool,

        /// Print the dry-run report as JSON
        #[arg(long, requires = "dry_run")]
        json: bool,
    },

    /// Verify the cache directory and license descriptor, then stop
    Check,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "swarm=info,swarm_launcher=info,swarm_core=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(std::io::stderr().is_terminal()),
        )
        .init();

    let cli = Cli::parse();

    // Failures are printed as well as logged; RUST_LOG may filter the log line out
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => match err.downcast_ref::<LaunchError>() {
            Some(LaunchError::BackendExit(code)) => {
                error!("Backend exited with code {}", code);
                eprintln!("swarm: backend exited with code {}", code);
                ExitCode::from(u8::try_from(*code).unwrap_or(1))
            }
            Some(launch_err) => {
                error!("[{}] {}", launch_err.stage(), launch_err);
                eprintln!("swarm: [{}] {}", launch_err.stage(), launch_err);
                ExitCode::from(1)
            }
            None => {
                error!("{:#}", err);
                eprintln!("swarm: {:#}", err);
                ExitCode::from(1)
            }
        },
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = resolve_config(&cli)?;
    let runtime = DockerRuntime::new(config.runtime.clone()).with_stop_grace(config.stop_grace());
    let mut launcher = SessionLauncher::new(config, runtime);

    match cli.command {
        Commands::Check => {
            let preflight = launcher.check()?;
            println!("cache:   {}", preflight.cache.path.display());
            println!("license: {}", preflight.license);
        }
        Commands::Run {
            backend,
            ros_bridge_ip,
            ports,
            publish,
            no_gpu,
            env,
            volumes,
            dry_run,
            json,
        } => {
            let network = if ports || !publish.is_empty() {
                NetworkMode::Ports
            } else {
                NetworkMode::Host
            };
            let gpu = if no_gpu {
                GpuRequirement::None
            } else {
                GpuRequirement::Required
            };
            let overrides = LaunchOverrides {
                gpu: Some(gpu),
                network: Some(network),
                ports: publish,
                env,
                volumes,
                ros_bridge_ip,
                container_name: None,
            };
            let request = LaunchRequest::new(backend).with_overrides(overrides);

            if dry_run {
                let report = launcher.plan(request)?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                } else {
                    for command in &report.commands {
                        println!("{}", command.join(" "));
                    }
                }
            } else {
                let report = launcher.launch(request).await?;
                info!(
                    "Session {} ended (started {})",
                    report.session_id,
                    report.started_at.to_rfc3339()
                );
            }
        }
    }

    Ok(())
}

/// Merge config file, environment and flags; relative base dirs resolve against the current directory
fn resolve_config(cli: &Cli) -> anyhow::Result<LauncherConfig> {
    let mut config = match &cli.config {
        Some(path) => LauncherConfig::from_file(path)?,
        None => LauncherConfig::default(),
    };

    if let Some(base_dir) = &cli.base_dir {
        config = config.with_base_dir(base_dir);
    }
    if let Some(license) = &cli.license {
        config = config.with_license_file(license);
    }
    if let Some(cache_dir) = &cli.cache_dir {
        config = config.with_cache_dir(cache_dir);
    }
    if let Some(runtime) = &cli.runtime {
        config = config.with_runtime(runtime);
    }
    if let Some(secs) = cli.stop_grace {
        config = config.with_stop_grace(Duration::from_secs(secs));
    }

    if config.base_dir.is_relative() {
        let cwd = std::env::current_dir().context("cannot determine current directory")?;
        config.base_dir = cwd.join(&config.base_dir);
    }

    Ok(config)
}
