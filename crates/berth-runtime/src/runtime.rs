//! Container lifecycle operations.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use berth_core::{ContainerRef, EnvVar, EnvironmentId, Framework, ImageHandle, ProjectId};

use crate::cli::{ContainerCli, DockerCli};
use crate::error::{RuntimeError, RuntimeResult};
use crate::ports::PortAllocator;

/// Fixed marker variable identifying containers managed by Berth.
const MANAGED_MARKER: (&str, &str) = ("BERTH_MANAGED", "1");

/// Configuration for the container runtime.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Memory ceiling per container, in megabytes.
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u32,

    /// CPU share per container.
    #[serde(default = "default_cpus")]
    pub cpus: f64,

    /// Maximum restart attempts for the on-failure policy.
    #[serde(default = "default_restart_retries")]
    pub restart_retries: u32,

    /// Grace period for `docker stop`, in seconds.
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u32,

    /// First host port handed out.
    #[serde(default = "default_port_range_start")]
    pub port_range_start: u16,

    /// Last host port handed out.
    #[serde(default = "default_port_range_end")]
    pub port_range_end: u16,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            memory_limit_mb: default_memory_limit_mb(),
            cpus: default_cpus(),
            restart_retries: default_restart_retries(),
            stop_grace_secs: default_stop_grace_secs(),
            port_range_start: default_port_range_start(),
            port_range_end: default_port_range_end(),
        }
    }
}

const fn default_memory_limit_mb() -> u32 {
    512
}
const fn default_cpus() -> f64 {
    1.0
}
const fn default_restart_retries() -> u32 {
    3
}
const fn default_stop_grace_secs() -> u32 {
    10
}
const fn default_port_range_start() -> u16 {
    4100
}
const fn default_port_range_end() -> u16 {
    4999
}

/// A container started by [`ContainerRuntime::run`].
#[derive(Debug, Clone)]
pub struct RunningContainer {
    /// Reference to the started container.
    pub container_ref: ContainerRef,
    /// Host port bound to the container's listening port.
    pub host_port: u16,
}

/// Observed health of a container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerHealth {
    /// Coarse run state.
    pub status: HealthStatus,
    /// Seconds since the container started, when running.
    pub uptime_secs: Option<f64>,
}

/// Coarse container run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Container is running.
    Running,
    /// Container exists but is not running.
    Stopped,
    /// Container is missing or could not be inspected.
    Unhealthy,
}

/// Manages container instances through the docker CLI.
///
/// Container names are deterministic per (project, environment), and
/// `run` stops any existing container of that name first, so at most
/// one instance per pair is running at any time.
pub struct ContainerRuntime {
    cli: Arc<dyn ContainerCli>,
    config: RuntimeConfig,
    ports: Arc<PortAllocator>,
}

impl ContainerRuntime {
    /// Create a runtime, discovering the docker binary.
    pub fn new(config: RuntimeConfig) -> RuntimeResult<Self> {
        let cli = DockerCli::discover()?;
        Ok(Self::with_cli(cli, config))
    }

    /// Create a runtime with an explicit CLI handle.
    #[must_use]
    pub fn with_cli(cli: DockerCli, config: RuntimeConfig) -> Self {
        Self::with_engine(Arc::new(cli), config)
    }

    /// Create a runtime over any engine CLI implementation.
    #[must_use]
    pub fn with_engine(cli: Arc<dyn ContainerCli>, config: RuntimeConfig) -> Self {
        let ports = Arc::new(PortAllocator::new(
            config.port_range_start,
            config.port_range_end,
        ));
        Self { cli, config, ports }
    }

    /// Check that the docker daemon is reachable.
    pub async fn preflight(&self) -> RuntimeResult<()> {
        self.cli.preflight().await
    }

    /// Start a container for a deployment.
    ///
    /// Stops and removes any container already holding the per-pair
    /// name, allocates a host port, and starts the image with the
    /// supplied environment injected verbatim plus the managed marker.
    #[instrument(skip(self, env_vars), fields(project = %project_id, environment = %environment_id))]
    pub async fn run(
        &self,
        image: &ImageHandle,
        project_id: &ProjectId,
        environment_id: &EnvironmentId,
        env_vars: &[EnvVar],
        framework: Framework,
    ) -> RuntimeResult<RunningContainer> {
        let name = container_name(project_id, environment_id);

        if self.inspect(&name).await?.is_some() {
            info!(container = %name, "replacing existing container");
            self.stop(&ContainerRef::new(name.clone())).await?;
        }

        let host_port = self.ports.allocate()?;
        let args = run_args(
            &name,
            image,
            host_port,
            container_port(framework),
            env_vars,
            &self.config,
        );

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let started = self.cli.exec(&arg_refs, None).await;
        match started {
            Ok(output) => {
                let container_ref = ContainerRef::new(output.stdout);
                info!(
                    container = %container_ref.short(),
                    host_port,
                    "container started"
                );
                Ok(RunningContainer {
                    container_ref,
                    host_port,
                })
            }
            Err(e) => {
                self.ports.release(host_port);
                Err(RuntimeError::StartFailed {
                    name,
                    message: e.to_string(),
                })
            }
        }
    }

    /// Stop and remove a container.
    ///
    /// Idempotent: a missing container is success, a stopped one is
    /// just removed. Any host port bound to the container returns to
    /// the allocator's pool.
    #[instrument(skip(self))]
    pub async fn stop(&self, container: &ContainerRef) -> RuntimeResult<()> {
        let Some(inspect) = self.inspect(container.as_str()).await? else {
            debug!(container = %container.short(), "container absent, nothing to stop");
            return Ok(());
        };

        if inspect.state.running {
            let grace = self.config.stop_grace_secs.to_string();
            self.cli
                .exec(&["stop", "-t", &grace, container.as_str()], None)
                .await?;
            debug!(container = %container.short(), "container stopped");
        }

        if let Err(e) = self.cli.exec(&["rm", container.as_str()], None).await {
            // Removal races with docker's own cleanup; absence is fine.
            warn!(container = %container.short(), error = %e, "container removal failed");
        }

        // Released only once the container is gone; a failed stop
        // leaves the port assigned.
        if let Some(port) = inspect.host_port() {
            self.ports.release(port);
        }

        Ok(())
    }

    /// Probe a container's run state.
    ///
    /// Inspect failures degrade to [`HealthStatus::Unhealthy`] rather
    /// than raising.
    pub async fn health(&self, container: &ContainerRef) -> ContainerHealth {
        match self.inspect(container.as_str()).await {
            Ok(Some(inspect)) if inspect.state.running => {
                let uptime_secs = inspect
                    .state
                    .started_at()
                    .map(|started| (Utc::now() - started).num_milliseconds() as f64 / 1000.0);
                ContainerHealth {
                    status: HealthStatus::Running,
                    uptime_secs,
                }
            }
            Ok(Some(_)) => ContainerHealth {
                status: HealthStatus::Stopped,
                uptime_secs: None,
            },
            Ok(None) | Err(_) => ContainerHealth {
                status: HealthStatus::Unhealthy,
                uptime_secs: None,
            },
        }
    }

    /// Inspect a container by name or ID. `None` when it does not exist.
    async fn inspect(&self, name_or_id: &str) -> RuntimeResult<Option<ContainerInspect>> {
        match self.cli.exec(&["inspect", name_or_id], None).await {
            Ok(output) => parse_inspect(&output.stdout).map(Some),
            Err(RuntimeError::CommandFailed { stderr, .. })
                if stderr.to_lowercase().contains("no such") =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Deterministic container name for a (project, environment) pair.
#[must_use]
pub fn container_name(project_id: &ProjectId, environment_id: &EnvironmentId) -> String {
    format!(
        "berth-{}-{}",
        sanitise(project_id.as_str()),
        sanitise(environment_id.as_str())
    )
}

/// In-container listening port by framework convention.
#[must_use]
pub const fn container_port(framework: Framework) -> u16 {
    match framework {
        Framework::StaticSite => 80,
        Framework::BackendService | Framework::Generic => 8000,
    }
}

fn sanitise(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Assemble the `docker run` argument list.
fn run_args(
    name: &str,
    image: &ImageHandle,
    host_port: u16,
    container_port: u16,
    env_vars: &[EnvVar],
    config: &RuntimeConfig,
) -> Vec<String> {
    let mut args = vec![
        "run".to_owned(),
        "-d".to_owned(),
        "--name".to_owned(),
        name.to_owned(),
        "-p".to_owned(),
        format!("{host_port}:{container_port}"),
        "--memory".to_owned(),
        format!("{}m", config.memory_limit_mb),
        "--cpus".to_owned(),
        config.cpus.to_string(),
        "--restart".to_owned(),
        format!("on-failure:{}", config.restart_retries),
    ];

    for var in env_vars {
        args.push("-e".to_owned());
        args.push(format!("{}={}", var.name, var.value));
    }
    args.push("-e".to_owned());
    args.push(format!("{}={}", MANAGED_MARKER.0, MANAGED_MARKER.1));

    args.push(image.as_str().to_owned());
    args
}

// ─────────────────────────────────────────────────────────────────────────
// docker inspect parsing
// ─────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ContainerInspect {
    #[serde(rename = "State")]
    state: InspectState,
    #[serde(rename = "NetworkSettings", default)]
    network: Option<NetworkSettings>,
}

#[derive(Debug, Deserialize)]
struct InspectState {
    #[serde(rename = "Running")]
    running: bool,
    #[serde(rename = "StartedAt", default)]
    started_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NetworkSettings {
    #[serde(rename = "Ports", default)]
    ports: HashMap<String, Option<Vec<PortBinding>>>,
}

#[derive(Debug, Deserialize)]
struct PortBinding {
    #[serde(rename = "HostPort")]
    host_port: String,
}

impl ContainerInspect {
    fn host_port(&self) -> Option<u16> {
        self.network.as_ref().and_then(|net| {
            net.ports
                .values()
                .flatten()
                .flatten()
                .find_map(|binding| binding.host_port.parse().ok())
        })
    }
}

impl InspectState {
    fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
            .as_deref()
            .and_then(|s| s.parse::<DateTime<Utc>>().ok())
    }
}

/// Parse the JSON array `docker inspect` prints.
fn parse_inspect(stdout: &str) -> RuntimeResult<ContainerInspect> {
    let mut entries: Vec<ContainerInspect> =
        serde_json::from_str(stdout).map_err(|e| RuntimeError::InspectParse(e.to_string()))?;
    entries
        .pop()
        .ok_or_else(|| RuntimeError::InspectParse("empty inspect result".to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::cli::MockCli;

    #[test]
    fn container_names_are_deterministic_and_sanitised() {
        let name = container_name(
            &ProjectId::new("my/project"),
            &EnvironmentId::new("prod:eu"),
        );
        assert_eq!(name, "berth-my_project-prod_eu");
        assert_eq!(
            name,
            container_name(&ProjectId::new("my/project"), &EnvironmentId::new("prod:eu"))
        );
    }

    #[test]
    fn port_conventions() {
        assert_eq!(container_port(Framework::StaticSite), 80);
        assert_eq!(container_port(Framework::BackendService), 8000);
        assert_eq!(container_port(Framework::Generic), 8000);
    }

    #[test]
    fn run_args_inject_env_verbatim() {
        let vars = vec![
            EnvVar::new("APP_NAME", "demo"),
            EnvVar::new("SPACES", "a b=c"),
        ];
        let args = run_args(
            "berth-p-e",
            &ImageHandle::new("berth/p:dep1"),
            4100,
            8000,
            &vars,
            &RuntimeConfig::default(),
        );

        assert_eq!(args[0], "run");
        assert!(args.contains(&"APP_NAME=demo".to_owned()));
        assert!(args.contains(&"SPACES=a b=c".to_owned()));
        assert!(args.contains(&"BERTH_MANAGED=1".to_owned()));
        assert!(args.contains(&"4100:8000".to_owned()));
        assert!(args.contains(&"on-failure:3".to_owned()));
        // Image is the last argument.
        assert_eq!(args.last().map(String::as_str), Some("berth/p:dep1"));
    }

    #[test]
    fn run_args_apply_resource_limits() {
        let config = RuntimeConfig {
            memory_limit_mb: 256,
            cpus: 0.5,
            restart_retries: 5,
            ..RuntimeConfig::default()
        };
        let args = run_args(
            "n",
            &ImageHandle::new("img"),
            4100,
            80,
            &[],
            &config,
        );

        assert!(args.contains(&"256m".to_owned()));
        assert!(args.contains(&"0.5".to_owned()));
        assert!(args.contains(&"on-failure:5".to_owned()));
    }

    #[test]
    fn parse_inspect_running_with_port() {
        let json = r#"[{
            "State": {"Running": true, "StartedAt": "2026-01-10T12:00:00.000000000Z"},
            "NetworkSettings": {"Ports": {"8000/tcp": [{"HostIp": "0.0.0.0", "HostPort": "4123"}]}}
        }]"#;

        let inspect = parse_inspect(json).expect("parse");
        assert!(inspect.state.running);
        assert_eq!(inspect.host_port(), Some(4123));
        assert!(inspect.state.started_at().is_some());
    }

    #[test]
    fn parse_inspect_stopped_without_bindings() {
        let json = r#"[{
            "State": {"Running": false, "StartedAt": "0001-01-01T00:00:00Z"},
            "NetworkSettings": {"Ports": {"8000/tcp": null}}
        }]"#;

        let inspect = parse_inspect(json).expect("parse");
        assert!(!inspect.state.running);
        assert_eq!(inspect.host_port(), None);
    }

    #[test]
    fn parse_inspect_rejects_garbage() {
        assert!(parse_inspect("not json").is_err());
        assert!(parse_inspect("[]").is_err());
    }

    const RUNNING_ON_4100: &str = r#"[{
        "State": {"Running": true, "StartedAt": "2026-01-10T12:00:00.000000000Z"},
        "NetworkSettings": {"Ports": {"8000/tcp": [{"HostIp": "0.0.0.0", "HostPort": "4100"}]}}
    }]"#;

    fn single_port_runtime(cli: &Arc<MockCli>) -> ContainerRuntime {
        let config = RuntimeConfig {
            port_range_start: 4100,
            port_range_end: 4100,
            ..RuntimeConfig::default()
        };
        ContainerRuntime::with_engine(Arc::clone(cli) as Arc<dyn ContainerCli>, config)
    }

    async fn start_container(runtime: &ContainerRuntime, env: &str) -> RunningContainer {
        runtime
            .run(
                &ImageHandle::new("berth/p:dep1"),
                &ProjectId::new("p"),
                &EnvironmentId::new(env),
                &[],
                Framework::Generic,
            )
            .await
            .expect("run")
    }

    #[tokio::test]
    async fn stop_on_absent_container_succeeds() {
        let cli = Arc::new(MockCli::new());
        cli.fail("inspect", "Error: No such object: berth-p-e");
        let runtime = single_port_runtime(&cli);

        runtime
            .stop(&ContainerRef::new("berth-p-e"))
            .await
            .expect("stop");

        // Only the existence probe ran.
        let calls = cli.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0][0], "inspect");
    }

    #[tokio::test]
    async fn health_degrades_to_unhealthy_on_inspect_error() {
        let cli = Arc::new(MockCli::new());
        cli.fail("inspect", "cannot connect to the docker daemon");
        let runtime = single_port_runtime(&cli);

        let health = runtime.health(&ContainerRef::new("c1")).await;
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.uptime_secs, None);
    }

    #[tokio::test]
    async fn failed_stop_keeps_the_port_assigned() {
        let cli = Arc::new(MockCli::new());
        let runtime = single_port_runtime(&cli);

        cli.fail("inspect", "Error: No such object: berth-p-e1");
        cli.respond("run", "cid1");
        let started = start_container(&runtime, "e1").await;
        assert_eq!(started.host_port, 4100);

        cli.respond("inspect", RUNNING_ON_4100);
        cli.fail("stop", "connection reset by peer");
        assert!(runtime.stop(&started.container_ref).await.is_err());

        // The container may still be bound to 4100, so the pool is
        // exhausted rather than handing the port out again.
        cli.fail("inspect", "Error: No such object: berth-p-e2");
        let collision = runtime
            .run(
                &ImageHandle::new("berth/p:dep2"),
                &ProjectId::new("p"),
                &EnvironmentId::new("e2"),
                &[],
                Framework::Generic,
            )
            .await;
        assert!(matches!(
            collision,
            Err(RuntimeError::PortsExhausted { .. })
        ));
    }

    #[tokio::test]
    async fn successful_stop_releases_the_port() {
        let cli = Arc::new(MockCli::new());
        let runtime = single_port_runtime(&cli);

        cli.fail("inspect", "Error: No such object: berth-p-e1");
        cli.respond("run", "cid1");
        let started = start_container(&runtime, "e1").await;
        assert_eq!(started.host_port, 4100);

        // Unscripted stop/rm succeed.
        cli.respond("inspect", RUNNING_ON_4100);
        runtime.stop(&started.container_ref).await.expect("stop");

        cli.fail("inspect", "Error: No such object: berth-p-e2");
        cli.respond("run", "cid2");
        let replacement = start_container(&runtime, "e2").await;
        assert_eq!(replacement.host_port, 4100);
    }
}
