//! Error types for the orchestrator.

use berth_build::BuildError;
use berth_core::StoreError;
use berth_runtime::RuntimeError;

/// Result type alias using [`ControlError`].
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors that can occur while orchestrating deployments.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// Request failed validation before any state change.
    #[error("validation error: {0}")]
    Validation(String),

    /// Referenced record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Record kind ("deployment", "project", "environment").
        kind: &'static str,
        /// The missing ID.
        id: String,
    },

    /// A pipeline is already running for this (project, environment).
    #[error("deployment already in flight for {project}/{environment}")]
    DeploymentInFlight {
        /// Project identifier.
        project: String,
        /// Environment identifier.
        environment: String,
    },

    /// Image build step failed.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// Container runtime step failed.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// Storage backend failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Create a validation error.
    #[must_use]
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
