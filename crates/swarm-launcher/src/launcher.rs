//! Session launch state machine
//!
//! ```text
//! Idle -> CacheVerifying -> LicenseValidating -> SpecBuilding -> Launching -> Running
//!              |                   |    |             |              |
//!              |                   |    +--> Verified (check only)   |
//!              +-------------------+------------------+--------------+--> LaunchFailed
//! ```
//!
//! Every precondition is checked exactly once, in this order, before the
//! container runtime is invoked. Nothing is retried; a failure carries the
//! stage that produced it. `Running` means the backend was handed off; the
//! launcher then blocks until it exits and passes its exit code through.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use swarm_core::{
    BackendHandle, CacheReady, ContainerRuntime, LaunchOverrides, LaunchSpec, LicenseDescriptor,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::LauncherConfig;
use crate::error::{LaunchError, Result};

/// Launcher state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LaunchState {
    /// Holding raw input, nothing checked yet
    Idle,
    CacheVerifying,
    LicenseValidating,
    SpecBuilding,
    /// Runtime invocation in progress
    Launching,
    /// Backend handed off
    Running,
    /// Preconditions passed and nothing was launched
    Verified,
    LaunchFailed,
}

impl fmt::Display for LaunchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LaunchState::Idle => "idle",
            LaunchState::CacheVerifying => "cache-verifying",
            LaunchState::LicenseValidating => "license-validating",
            LaunchState::SpecBuilding => "spec-building",
            LaunchState::Launching => "launching",
            LaunchState::Running => "running",
            LaunchState::Verified => "verified",
            LaunchState::LaunchFailed => "launch-failed",
        };
        write!(f, "{}", name)
    }
}

/// What the caller asked to launch
#[derive(Debug, Clone, Default)]
pub struct LaunchRequest {
    /// Backend image; `None` when the user supplied nothing
    pub backend: Option<String>,
    pub overrides: LaunchOverrides,
}

impl LaunchRequest {
    pub fn new(backend: Option<String>) -> Self {
        Self {
            backend,
            overrides: LaunchOverrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: LaunchOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

/// Result of the cache and license checks
#[derive(Debug, Clone)]
pub struct Preflight {
    pub cache: CacheReady,
    pub license: LicenseDescriptor,
}

/// Summary of a launch (or of a dry run)
#[derive(Debug, Clone, Serialize)]
pub struct LaunchReport {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub account_id: String,
    pub cache_dir: PathBuf,
    pub cache_created: bool,
    pub spec: LaunchSpec,
    /// Runtime command lines, in execution order
    pub commands: Vec<Vec<String>>,
    /// States entered up to this report
    pub history: Vec<LaunchState>,
    /// Backend exit code; `None` for a dry run
    pub exit_code: Option<i32>,
}

/// Coordinates one backend launch
pub struct SessionLauncher<R: ContainerRuntime> {
    config: LauncherConfig,
    runtime: R,
    session_id: Uuid,
    state: LaunchState,
    history: Vec<LaunchState>,
}

impl<R: ContainerRuntime> SessionLauncher<R> {
    /// Create a launcher in the `Idle` state
    pub fn new(config: LauncherConfig, runtime: R) -> Self {
        Self {
            config,
            runtime,
            session_id: Uuid::new_v4(),
            state: LaunchState::Idle,
            history: vec![LaunchState::Idle],
        }
    }

    pub fn state(&self) -> LaunchState {
        self.state
    }

    /// Every state entered so far, starting with `Idle`
    pub fn history(&self) -> &[LaunchState] {
        &self.history
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    /// Container name derived from the session id
    pub fn container_name(&self) -> String {
        let id = self.session_id.simple().to_string();
        format!("swarm-core-{}", &id[..8])
    }

    fn transition(&mut self, next: LaunchState) {
        info!(session = %self.session_id, "▶ {} -> {}", self.state, next);
        self.state = next;
        self.history.push(next);
    }

    fn fail(&mut self, err: LaunchError) -> LaunchError {
        debug!(stage = %self.state, "Launch failed: {}", err);
        self.transition(LaunchState::LaunchFailed);
        err
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.state == LaunchState::Idle {
            Ok(())
        } else {
            Err(LaunchError::config(format!(
                "launcher already used (state: {})",
                self.state
            )))
        }
    }

    /// Verify the cache directory and license descriptor.
    pub fn preflight(&mut self) -> Result<Preflight> {
        self.ensure_idle()?;

        self.transition(LaunchState::CacheVerifying);
        let cache = self
            .config
            .cache_store()
            .ensure()
            .map_err(|e| self.fail(e.into()))?;

        self.transition(LaunchState::LicenseValidating);
        let license = LicenseDescriptor::load(&self.config.license_path())
            .map_err(|e| self.fail(e.into()))?;
        info!("🔑 License descriptor accepted: {}", license);

        Ok(Preflight { cache, license })
    }

    /// Run the cache and license checks only, ending in `Verified`.
    pub fn check(&mut self) -> Result<Preflight> {
        let preflight = self.preflight()?;
        self.transition(LaunchState::Verified);
        Ok(preflight)
    }

    /// Run every check and build the launch spec without invoking the runtime.
    pub fn plan(&mut self, request: LaunchRequest) -> Result<LaunchReport> {
        let preflight = self.preflight()?;

        self.transition(LaunchState::SpecBuilding);
        let overrides = LaunchOverrides {
            container_name: Some(
                request
                    .overrides
                    .container_name
                    .clone()
                    .unwrap_or_else(|| self.container_name()),
            ),
            ..request.overrides
        };
        let spec = LaunchSpec::build(request.backend.as_deref(), &preflight.cache.path, overrides)
            .map_err(|e| self.fail(e.into()))?;

        Ok(LaunchReport {
            session_id: self.session_id,
            started_at: Utc::now(),
            account_id: preflight.license.account_id().to_string(),
            cache_dir: preflight.cache.path,
            cache_created: preflight.cache.created,
            commands: self.runtime.command_lines(&spec),
            history: self.history.clone(),
            spec,
            exit_code: None,
        })
    }

    /// Launch the backend and block until it exits.
    ///
    /// A nonzero backend exit is returned as [`LaunchError::BackendExit`].
    /// Once `Running` is entered it is never left: a failure while waiting
    /// is returned as is, since the handoff itself succeeded.
    pub async fn launch(&mut self, request: LaunchRequest) -> Result<LaunchReport> {
        let mut report = self.plan(request)?;

        self.transition(LaunchState::Launching);
        info!("🚀 Launching {} via {}", report.spec.backend(), self.runtime.name());
        let mut handle = match self.runtime.start(&report.spec).await {
            Ok(handle) => handle,
            Err(e) => return Err(self.fail(e.into())),
        };

        self.transition(LaunchState::Running);
        report.history = self.history.clone();
        let code = match handle.wait().await {
            Ok(code) => code,
            Err(e) => {
                warn!("Lost track of backend {}: {}", report.spec.backend(), e);
                return Err(e.into());
            }
        };
        report.exit_code = Some(code);

        if code != 0 {
            warn!("Backend {} exited with code {}", report.spec.backend(), code);
            return Err(LaunchError::BackendExit(code));
        }

        info!("✅ Backend {} exited cleanly", report.spec.backend());
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::fs;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use swarm_core::{
        CacheError, GpuRequirement, LicenseError, NetworkMode, PortBinding, RuntimeError,
        SpecError, CONTAINER_CACHE_PATH, DEFAULT_PUBLISHED_PORTS,
    };

    const VALID_LICENSE: &str = r#"{"Key": "ABCD-1234", "Activated": false, "AccountID": "acct-7"}"#;

    /// Records started specs and reports a fixed outcome
    #[derive(Clone, Default)]
    struct RecordingRuntime {
        started: Arc<Mutex<Vec<LaunchSpec>>>,
        exit_code: i32,
        unavailable: bool,
        wait_fails: bool,
    }

    struct RecordedSession {
        exit_code: i32,
        wait_fails: bool,
    }

    #[async_trait]
    impl BackendHandle for RecordedSession {
        async fn wait(&mut self) -> swarm_core::Result<i32> {
            if self.wait_fails {
                return Err(RuntimeError::Io(std::io::Error::other("wait interrupted")));
            }
            Ok(self.exit_code)
        }
    }

    #[async_trait]
    impl ContainerRuntime for RecordingRuntime {
        type Handle = RecordedSession;

        fn name(&self) -> &str {
            "recording"
        }

        fn command_lines(&self, spec: &LaunchSpec) -> Vec<Vec<String>> {
            vec![vec!["recording".to_string(), spec.backend().to_string()]]
        }

        async fn start(&self, spec: &LaunchSpec) -> swarm_core::Result<RecordedSession> {
            if self.unavailable {
                return Err(RuntimeError::unavailable("daemon not running"));
            }
            self.started.lock().unwrap().push(spec.clone());
            Ok(RecordedSession {
                exit_code: self.exit_code,
                wait_fails: self.wait_fails,
            })
        }
    }

    fn write_license(base: &Path, contents: &str) {
        let settings = base.join("settings");
        fs::create_dir_all(&settings).unwrap();
        fs::write(settings.join("LicenseKey.json"), contents).unwrap();
    }

    fn launcher(base: &Path, runtime: RecordingRuntime) -> SessionLauncher<RecordingRuntime> {
        SessionLauncher::new(LauncherConfig::new(base), runtime)
    }

    fn request(backend: &str) -> LaunchRequest {
        LaunchRequest::new(Some(backend.to_string()))
    }

    #[tokio::test]
    async fn test_launch_creates_cache_and_runs() {
        let dir = tempfile::tempdir().unwrap();
        write_license(dir.path(), VALID_LICENSE);
        let runtime = RecordingRuntime::default();
        let mut launcher = launcher(dir.path(), runtime.clone());

        let report = launcher.launch(request("swarm_home_v1.5.0")).await.unwrap();

        assert!(dir.path().join(".cache").is_dir());
        assert!(report.cache_created);
        assert_eq!(report.exit_code, Some(0));
        assert_eq!(report.account_id, "acct-7");
        assert_eq!(launcher.state(), LaunchState::Running);
        assert_eq!(
            launcher.history(),
            &[
                LaunchState::Idle,
                LaunchState::CacheVerifying,
                LaunchState::LicenseValidating,
                LaunchState::SpecBuilding,
                LaunchState::Launching,
                LaunchState::Running,
            ]
        );

        let started = runtime.started.lock().unwrap();
        assert_eq!(started.len(), 1);
        let spec = &started[0];
        assert_eq!(spec.gpu(), GpuRequirement::Required);
        assert_eq!(spec.network(), NetworkMode::Host);
        assert_eq!(spec.volumes().len(), 1);
        assert_eq!(spec.cache_mount().host_path, dir.path().join(".cache"));
        assert_eq!(spec.cache_mount().container_path, CONTAINER_CACHE_PATH);
        assert_eq!(spec.container_name(), launcher.container_name());
    }

    #[tokio::test]
    async fn test_missing_backend_never_launches() {
        let dir = tempfile::tempdir().unwrap();
        write_license(dir.path(), VALID_LICENSE);
        let runtime = RecordingRuntime::default();
        let mut launcher = launcher(dir.path(), runtime.clone());

        let err = launcher.launch(LaunchRequest::new(None)).await.unwrap_err();

        assert!(matches!(err, LaunchError::Spec(SpecError::MissingBackendIdentifier)));
        assert_eq!(err.exit_code(), 1);
        assert_eq!(launcher.state(), LaunchState::LaunchFailed);
        assert!(!launcher.history().contains(&LaunchState::Launching));
        assert!(runtime.started.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_premature_activation_stops_before_spec() {
        let dir = tempfile::tempdir().unwrap();
        write_license(dir.path(), r#"{"Key": "k", "Activated": true, "AccountID": "a"}"#);
        let mut launcher = launcher(dir.path(), RecordingRuntime::default());

        let err = launcher.launch(request("swarm_home_v1.5.0")).await.unwrap_err();

        assert!(matches!(err, LaunchError::License(LicenseError::PrematureActivation)));
        assert_eq!(err.stage(), LaunchState::LicenseValidating);
        assert!(!launcher.history().contains(&LaunchState::SpecBuilding));
    }

    #[tokio::test]
    async fn test_missing_license_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut launcher = launcher(dir.path(), RecordingRuntime::default());

        let err = launcher.launch(request("img")).await.unwrap_err();

        assert!(matches!(err, LaunchError::License(LicenseError::NotFound(_))));
        assert_eq!(launcher.state(), LaunchState::LaunchFailed);
    }

    #[tokio::test]
    async fn test_cache_failure_skips_license() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".cache"), b"file").unwrap();
        let mut launcher = launcher(dir.path(), RecordingRuntime::default());

        let err = launcher.launch(request("img")).await.unwrap_err();

        assert!(matches!(err, LaunchError::Cache(CacheError::NotADirectory(_))));
        assert!(!launcher.history().contains(&LaunchState::LicenseValidating));
    }

    #[tokio::test]
    async fn test_backend_exit_code_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        write_license(dir.path(), VALID_LICENSE);
        let runtime = RecordingRuntime {
            exit_code: 3,
            ..Default::default()
        };
        let mut launcher = launcher(dir.path(), runtime);

        let err = launcher.launch(request("img")).await.unwrap_err();

        assert!(matches!(err, LaunchError::BackendExit(3)));
        assert_eq!(err.exit_code(), 3);
        assert_eq!(launcher.state(), LaunchState::Running);
    }

    #[tokio::test]
    async fn test_exit_code_127_from_backend_stays_running() {
        let dir = tempfile::tempdir().unwrap();
        write_license(dir.path(), VALID_LICENSE);
        let runtime = RecordingRuntime {
            exit_code: 127,
            ..Default::default()
        };
        let mut launcher = launcher(dir.path(), runtime);

        let err = launcher.launch(request("img")).await.unwrap_err();

        assert!(matches!(err, LaunchError::BackendExit(127)));
        assert_eq!(err.exit_code(), 127);
        assert_eq!(launcher.state(), LaunchState::Running);
    }

    #[tokio::test]
    async fn test_wait_failure_never_leaves_running() {
        let dir = tempfile::tempdir().unwrap();
        write_license(dir.path(), VALID_LICENSE);
        let runtime = RecordingRuntime {
            wait_fails: true,
            ..Default::default()
        };
        let mut launcher = launcher(dir.path(), runtime);

        let err = launcher.launch(request("img")).await.unwrap_err();

        assert!(matches!(err, LaunchError::RuntimeUnavailable(RuntimeError::Io(_))));
        assert_eq!(launcher.state(), LaunchState::Running);
        assert_eq!(launcher.history().last(), Some(&LaunchState::Running));
        assert!(!launcher.history().contains(&LaunchState::LaunchFailed));
    }

    #[tokio::test]
    async fn test_runtime_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        write_license(dir.path(), VALID_LICENSE);
        let runtime = RecordingRuntime {
            unavailable: true,
            ..Default::default()
        };
        let mut launcher = launcher(dir.path(), runtime);

        let err = launcher.launch(request("img")).await.unwrap_err();

        assert!(matches!(err, LaunchError::RuntimeUnavailable(_)));
        assert_eq!(launcher.state(), LaunchState::LaunchFailed);
        assert!(!launcher.history().contains(&LaunchState::Running));
    }

    #[tokio::test]
    async fn test_port_mode_spec() {
        let dir = tempfile::tempdir().unwrap();
        write_license(dir.path(), VALID_LICENSE);
        let runtime = RecordingRuntime::default();
        let mut launcher = launcher(dir.path(), runtime.clone());
        let overrides = LaunchOverrides::default()
            .with_network(NetworkMode::Ports)
            .with_port(PortBinding::tcp(9090));

        launcher
            .launch(request("img").with_overrides(overrides))
            .await
            .unwrap();

        let started = runtime.started.lock().unwrap();
        let spec = &started[0];
        assert_eq!(spec.volumes().len(), 1);
        assert_eq!(spec.ports().len(), DEFAULT_PUBLISHED_PORTS.len() + 1);
        assert!(spec.ports().contains(&PortBinding::tcp(9090)));
    }

    #[test]
    fn test_plan_does_not_start() {
        let dir = tempfile::tempdir().unwrap();
        write_license(dir.path(), VALID_LICENSE);
        fs::create_dir(dir.path().join(".cache")).unwrap();
        let runtime = RecordingRuntime::default();
        let mut launcher = launcher(dir.path(), runtime.clone());

        let report = launcher.plan(request("img")).unwrap();

        assert!(!report.cache_created);
        assert_eq!(report.commands, vec![vec!["recording", "img"]]);
        assert_eq!(report.exit_code, None);
        assert_eq!(launcher.state(), LaunchState::SpecBuilding);
        assert!(runtime.started.lock().unwrap().is_empty());
    }

    #[test]
    fn test_plan_report_serializes() {
        let dir = tempfile::tempdir().unwrap();
        write_license(dir.path(), VALID_LICENSE);
        let mut launcher = launcher(dir.path(), RecordingRuntime::default());

        let report = launcher.plan(request("img")).unwrap();
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["session_id"], launcher.session_id().to_string());
        assert_eq!(json["account_id"], "acct-7");
        assert_eq!(json["spec"]["gpu"], "required");
        assert_eq!(json["history"].as_array().unwrap().last().unwrap(), "spec-building");
        assert!(json["exit_code"].is_null());
    }

    #[test]
    fn test_check_ends_verified() {
        let dir = tempfile::tempdir().unwrap();
        write_license(dir.path(), VALID_LICENSE);
        let runtime = RecordingRuntime::default();
        let mut launcher = launcher(dir.path(), runtime.clone());

        let preflight = launcher.check().unwrap();

        assert_eq!(preflight.license.account_id(), "acct-7");
        assert_eq!(launcher.state(), LaunchState::Verified);
        assert_eq!(
            launcher.history(),
            &[
                LaunchState::Idle,
                LaunchState::CacheVerifying,
                LaunchState::LicenseValidating,
                LaunchState::Verified,
            ]
        );
        assert!(runtime.started.lock().unwrap().is_empty());
        assert!(launcher.check().is_err());
    }

    #[test]
    fn test_launcher_is_single_use() {
        let dir = tempfile::tempdir().unwrap();
        write_license(dir.path(), VALID_LICENSE);
        let mut launcher = launcher(dir.path(), RecordingRuntime::default());

        launcher.preflight().unwrap();
        let err = launcher.preflight().unwrap_err();
        assert!(matches!(err, LaunchError::Config(_)));
    }

    #[test]
    fn test_container_name_from_session() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = launcher(dir.path(), RecordingRuntime::default());
        let name = launcher.container_name();
        assert!(name.starts_with("swarm-core-"));
        assert_eq!(name.len(), "swarm-core-".len() + 8);
    }
}
