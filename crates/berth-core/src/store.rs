//! Storage traits for deployments and their collaborators.
//!
//! The deployment core treats persistence as a seam: services depend
//! on these traits, and tests (plus the single-node server) use the
//! in-memory implementation from [`crate::memory`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::deployment::{
    DeploymentLogEntry, DeploymentRecord, DeploymentStatus, LogLevel, StatusUpdate,
};
use crate::project::{Environment, Project};
use crate::types::{DeploymentId, EnvironmentId, ProjectId};

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No record with the given ID.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Record kind ("deployment", "project", "environment").
        kind: &'static str,
        /// The missing ID.
        id: String,
    },

    /// Insert collided with an existing record.
    #[error("{kind} already exists: {id}")]
    AlreadyExists {
        /// Record kind.
        kind: &'static str,
        /// The duplicate ID.
        id: String,
    },

    /// Attempted status change violates the deployment lifecycle.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status.
        from: DeploymentStatus,
        /// Attempted target status.
        to: DeploymentStatus,
    },

    /// Backend failure.
    #[error("store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// A not-found error for a deployment.
    #[must_use]
    pub fn deployment_not_found(id: &DeploymentId) -> Self {
        Self::NotFound {
            kind: "deployment",
            id: id.to_string(),
        }
    }
}

/// Filter criteria for listing deployments.
#[derive(Debug, Clone, Default)]
pub struct DeploymentFilter {
    /// Filter by project.
    pub project_id: Option<ProjectId>,
    /// Filter by environment.
    pub environment_id: Option<EnvironmentId>,
    /// Filter by status.
    pub status: Option<DeploymentStatus>,
}

impl DeploymentFilter {
    /// Create an empty filter.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            project_id: None,
            environment_id: None,
            status: None,
        }
    }

    /// Filter by project.
    #[must_use]
    pub fn with_project(mut self, project_id: ProjectId) -> Self {
        self.project_id = Some(project_id);
        self
    }

    /// Filter by environment.
    #[must_use]
    pub fn with_environment(mut self, environment_id: EnvironmentId) -> Self {
        self.environment_id = Some(environment_id);
        self
    }

    /// Filter by status.
    #[must_use]
    pub const fn with_status(mut self, status: DeploymentStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Backend for deployment records and their logs.
///
/// Implementations own the lifecycle invariant: `update_status` must
/// reject any transition [`DeploymentStatus::can_transition_to`] does
/// not allow, and terminal records must never change again except for
/// log appends.
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Insert a new deployment record.
    async fn insert(&self, record: &DeploymentRecord) -> StoreResult<()>;

    /// Get a deployment by ID. Returns `None` when unknown.
    async fn get(&self, id: &DeploymentId) -> StoreResult<Option<DeploymentRecord>>;

    /// Apply a status transition, returning the updated record.
    async fn update_status(
        &self,
        id: &DeploymentId,
        update: StatusUpdate,
    ) -> StoreResult<DeploymentRecord>;

    /// List deployments matching the filter, newest first.
    async fn list(&self, filter: &DeploymentFilter) -> StoreResult<Vec<DeploymentRecord>>;

    /// Most recent successful deployment for (project, environment)
    /// created strictly before `before`. Used by rollback.
    async fn latest_success_before(
        &self,
        project_id: &ProjectId,
        environment_id: &EnvironmentId,
        before: DateTime<Utc>,
    ) -> StoreResult<Option<DeploymentRecord>>;

    /// Append a log entry to a deployment.
    ///
    /// Unlike status updates this is legal for terminal deployments.
    async fn append_log(
        &self,
        id: &DeploymentId,
        level: LogLevel,
        message: &str,
    ) -> StoreResult<()>;

    /// Read a deployment's log, in insertion order.
    async fn logs(&self, id: &DeploymentId) -> StoreResult<Vec<DeploymentLogEntry>>;
}

/// Read access to project records.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Get a project by ID. Returns `None` when unknown.
    async fn project(&self, id: &ProjectId) -> StoreResult<Option<Project>>;
}

/// Read access to environment records.
#[async_trait]
pub trait EnvironmentStore: Send + Sync {
    /// Get an environment by ID. Returns `None` when unknown.
    async fn environment(&self, id: &EnvironmentId) -> StoreResult<Option<Environment>>;

    /// Non-deleted environments of a project, sorted by name.
    async fn list_for_project(&self, project_id: &ProjectId) -> StoreResult<Vec<Environment>>;
}
