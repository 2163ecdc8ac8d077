//! Error types for the container runtime.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors that can occur while managing containers.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The docker binary could not be located.
    #[error("docker binary not found (searched PATH and {searched:?})")]
    BinaryNotFound {
        /// Fallback paths that were checked.
        searched: Vec<PathBuf>,
    },

    /// The docker daemon did not respond to a preflight probe.
    #[error("docker daemon unreachable: {0}")]
    DaemonUnreachable(String),

    /// Spawning the docker process failed.
    #[error("failed to invoke docker: {0}")]
    Spawn(#[from] std::io::Error),

    /// A docker command exited non-zero.
    #[error("docker {command} failed (exit code {exit_code}): {stderr}")]
    CommandFailed {
        /// The docker subcommand that failed.
        command: String,
        /// Process exit code.
        exit_code: i32,
        /// Captured stderr.
        stderr: String,
    },

    /// Container create/start failed.
    #[error("failed to start container {name}: {message}")]
    StartFailed {
        /// Container name.
        name: String,
        /// Error detail.
        message: String,
    },

    /// No free host port remains in the configured range.
    #[error("host port range {start}-{end} exhausted")]
    PortsExhausted {
        /// First port of the range.
        start: u16,
        /// Last port of the range.
        end: u16,
    },

    /// Inspect output could not be parsed.
    #[error("failed to parse docker inspect output: {0}")]
    InspectParse(String),
}
