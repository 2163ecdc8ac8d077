//! Error types for the image builder.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for build operations.
pub type BuildResult<T> = Result<T, BuildError>;

/// Errors that can occur while turning a revision into an image.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Cloning the repository failed.
    #[error("failed to clone {url}: {message}")]
    GitClone {
        /// Repository URL.
        url: String,
        /// Error detail.
        message: String,
    },

    /// Fetching updates into the cached repository failed.
    #[error("failed to fetch repository: {0}")]
    GitFetch(String),

    /// The requested revision could not be resolved or extracted.
    #[error("failed to check out revision {revision}: {message}")]
    Revision {
        /// Branch name or commit SHA as requested.
        revision: String,
        /// Error detail.
        message: String,
    },

    /// A tree entry tried to escape the working directory.
    #[error("refusing path outside working directory: {path}")]
    PathEscape {
        /// The offending path.
        path: PathBuf,
    },

    /// The image build toolchain exited non-zero.
    #[error("image build failed (exit code {exit_code}): {stderr}")]
    ImageBuild {
        /// Process exit code.
        exit_code: i32,
        /// Captured build output.
        stderr: String,
    },

    /// The container toolchain could not be driven at all.
    #[error(transparent)]
    Runtime(#[from] berth_runtime::RuntimeError),

    /// Filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error (task join failures and the like).
    #[error("internal build error: {0}")]
    Internal(String),
}
