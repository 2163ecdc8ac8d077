//! Thin wrapper around the docker command-line client.
//!
//! All container and image operations shell out to the docker CLI with
//! captured output. The wrapper owns binary discovery and the daemon
//! preflight probe; higher layers compose subcommands on top of it.

use std::collections::{HashMap, VecDeque};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{RuntimeError, RuntimeResult};

const FALLBACK_PATHS: &[&str] = &["/usr/bin/docker", "/usr/local/bin/docker"];

/// Executes container engine subcommands.
///
/// [`DockerCli`] is the production implementation; [`MockCli`] scripts
/// responses so lifecycle paths can be exercised without a daemon.
#[async_trait]
pub trait ContainerCli: Send + Sync {
    /// Run a subcommand to completion, capturing output.
    async fn exec(&self, args: &[&str], cwd: Option<&Path>) -> RuntimeResult<CliOutput>;

    /// Check that the engine daemon is reachable.
    async fn preflight(&self) -> RuntimeResult<()>;
}

/// Captured output of a finished docker invocation.
#[derive(Debug)]
pub struct CliOutput {
    /// Trimmed stdout.
    pub stdout: String,
    /// Trimmed stderr.
    pub stderr: String,
}

/// Handle to a discovered docker binary.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: PathBuf,
}

impl DockerCli {
    /// Locate the docker binary in PATH or common locations.
    pub fn discover() -> RuntimeResult<Self> {
        if let Ok(path) = which::which("docker") {
            return Ok(Self { binary: path });
        }

        for candidate in FALLBACK_PATHS {
            let path = PathBuf::from(candidate);
            if path.exists() {
                return Ok(Self { binary: path });
            }
        }

        Err(RuntimeError::BinaryNotFound {
            searched: FALLBACK_PATHS.iter().map(PathBuf::from).collect(),
        })
    }

    /// Use an explicit binary path (for configuration overrides).
    #[must_use]
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Check that the daemon answers a `docker version` probe.
    pub async fn preflight(&self) -> RuntimeResult<()> {
        match self.run(["version", "--format", "{{.Server.Version}}"], None).await {
            Ok(output) => {
                debug!(version = %output.stdout, "docker daemon reachable");
                Ok(())
            }
            Err(RuntimeError::CommandFailed { stderr, .. }) => {
                Err(RuntimeError::DaemonUnreachable(stderr))
            }
            Err(e) => Err(e),
        }
    }

    /// Run a docker subcommand to completion, capturing output.
    ///
    /// Non-zero exit maps to [`RuntimeError::CommandFailed`] carrying
    /// the subcommand name and captured stderr.
    pub async fn run<I, S>(&self, args: I, cwd: Option<&Path>) -> RuntimeResult<CliOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<_> = args.into_iter().map(|a| a.as_ref().to_owned()).collect();
        let command_name = args
            .first()
            .map(|a| a.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut cmd = Command::new(&self.binary);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        debug!(command = %command_name, "invoking docker");
        let output = cmd.output().await?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();

        if output.status.success() {
            Ok(CliOutput { stdout, stderr })
        } else {
            Err(RuntimeError::CommandFailed {
                command: command_name,
                exit_code: output.status.code().unwrap_or(-1),
                stderr,
            })
        }
    }
}

#[async_trait]
impl ContainerCli for DockerCli {
    async fn exec(&self, args: &[&str], cwd: Option<&Path>) -> RuntimeResult<CliOutput> {
        self.run(args.iter().copied(), cwd).await
    }

    async fn preflight(&self) -> RuntimeResult<()> {
        DockerCli::preflight(self).await
    }
}

/// Scripted engine CLI for tests.
///
/// Responses are queued per subcommand and consumed in order; an
/// unscripted subcommand succeeds with empty output. Every invocation
/// is recorded for assertions.
#[derive(Debug, Default)]
pub struct MockCli {
    responses: Mutex<HashMap<String, VecDeque<RuntimeResult<CliOutput>>>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl MockCli {
    /// Create an empty mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response for a subcommand.
    pub fn respond(&self, subcommand: &str, stdout: &str) {
        self.responses
            .lock()
            .expect("mock lock poisoned")
            .entry(subcommand.to_owned())
            .or_default()
            .push_back(Ok(CliOutput {
                stdout: stdout.to_owned(),
                stderr: String::new(),
            }));
    }

    /// Queue a failure for a subcommand.
    pub fn fail(&self, subcommand: &str, stderr: &str) {
        self.responses
            .lock()
            .expect("mock lock poisoned")
            .entry(subcommand.to_owned())
            .or_default()
            .push_back(Err(RuntimeError::CommandFailed {
                command: subcommand.to_owned(),
                exit_code: 1,
                stderr: stderr.to_owned(),
            }));
    }

    /// Every invocation seen, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().expect("mock lock poisoned").clone()
    }
}

#[async_trait]
impl ContainerCli for MockCli {
    async fn exec(&self, args: &[&str], _cwd: Option<&Path>) -> RuntimeResult<CliOutput> {
        self.calls
            .lock()
            .expect("mock lock poisoned")
            .push(args.iter().map(|a| (*a).to_owned()).collect());

        let subcommand = args.first().copied().unwrap_or_default();
        let queued = self
            .responses
            .lock()
            .expect("mock lock poisoned")
            .get_mut(subcommand)
            .and_then(VecDeque::pop_front);

        match queued {
            Some(response) => response,
            None => Ok(CliOutput {
                stdout: String::new(),
                stderr: String::new(),
            }),
        }
    }

    async fn preflight(&self) -> RuntimeResult<()> {
        Ok(())
    }
}
