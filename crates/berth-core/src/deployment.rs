//! Deployment records, status machine, and log entries.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ContainerRef, DeploymentId, EnvironmentId, ProjectId};

/// Lifecycle status of a deployment.
///
/// The only legal forward path is `Pending → Building → {Success |
/// Failed}`; `Pending` and `Building` may also move to `Cancelled`.
/// Terminal statuses never transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Record created, pipeline not yet started.
    Pending,
    /// Pipeline is building and launching the revision.
    Building,
    /// Container started; deployment is reachable.
    Success,
    /// A pipeline step failed; see the record's error field.
    Failed,
    /// Cancelled by an operator before completion.
    Cancelled,
}

impl DeploymentStatus {
    /// Check whether this is a terminal status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }

    /// Check whether the transition `self → to` is legal.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Building)
                | (Self::Building, Self::Success | Self::Failed)
                | (Self::Pending | Self::Building, Self::Cancelled)
        )
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Building => write!(f, "building"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A deployment record: the durable contract other subsystems read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Unique deployment identifier.
    pub id: DeploymentId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Target environment.
    pub environment_id: EnvironmentId,
    /// Source revision to deploy (default branch head when absent).
    pub revision: Option<String>,
    /// Human-readable revision message.
    pub revision_message: Option<String>,
    /// Current lifecycle status.
    pub status: DeploymentStatus,
    /// Wall-clock pipeline duration, set once terminal.
    pub duration_secs: Option<f64>,
    /// Running container, set on successful run.
    pub container_ref: Option<ContainerRef>,
    /// Host-facing port bound to the container, set on successful run.
    pub host_port: Option<u16>,
    /// Failure message, set when the pipeline fails.
    pub error: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl DeploymentRecord {
    /// Create a new pending deployment record.
    #[must_use]
    pub fn new(
        project_id: ProjectId,
        environment_id: EnvironmentId,
        revision: Option<String>,
        revision_message: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: DeploymentId::generate(),
            project_id,
            environment_id,
            revision,
            revision_message,
            status: DeploymentStatus::Pending,
            duration_secs: None,
            container_ref: None,
            host_port: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check whether the record is in a terminal status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// A status transition together with the fields it sets.
///
/// Bundling the fields with the transition keeps terminal records
/// immutable: there is no way to flip status without supplying (or
/// clearing) exactly the fields that status owns.
#[derive(Debug, Clone)]
pub enum StatusUpdate {
    /// Pipeline picked up the deployment.
    Building,
    /// Pipeline finished; container is up.
    Success {
        /// Pipeline duration in seconds.
        duration_secs: f64,
        /// The started container.
        container_ref: ContainerRef,
        /// Allocated host port.
        host_port: u16,
    },
    /// A pipeline step failed.
    Failed {
        /// Pipeline duration in seconds.
        duration_secs: f64,
        /// Failure message recorded on the deployment.
        error: String,
    },
    /// Deployment was cancelled before completion.
    Cancelled {
        /// Elapsed duration, when the pipeline had already started.
        duration_secs: Option<f64>,
    },
}

impl StatusUpdate {
    /// The status this update transitions to.
    #[must_use]
    pub const fn status(&self) -> DeploymentStatus {
        match self {
            Self::Building => DeploymentStatus::Building,
            Self::Success { .. } => DeploymentStatus::Success,
            Self::Failed { .. } => DeploymentStatus::Failed,
            Self::Cancelled { .. } => DeploymentStatus::Cancelled,
        }
    }

    /// Apply this update's fields to a record. Status legality is
    /// checked by the store before calling this.
    pub fn apply_to(self, record: &mut DeploymentRecord) {
        record.status = self.status();
        match self {
            Self::Building => {}
            Self::Success {
                duration_secs,
                container_ref,
                host_port,
            } => {
                record.duration_secs = Some(duration_secs);
                record.container_ref = Some(container_ref);
                record.host_port = Some(host_port);
            }
            Self::Failed {
                duration_secs,
                error,
            } => {
                record.duration_secs = Some(duration_secs);
                record.error = Some(error);
            }
            Self::Cancelled { duration_secs } => {
                record.duration_secs = duration_secs;
            }
        }
        record.updated_at = Utc::now();
    }
}

/// Severity of a deployment log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Diagnostic detail.
    Debug,
    /// Normal pipeline progress.
    Info,
    /// Recoverable problem (e.g. proxy reload failure).
    Warning,
    /// Step failure.
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// An append-only log line attached to a deployment.
///
/// Entries are ordered by insertion, which the orchestrator guarantees
/// matches chronological pipeline order for a single deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentLogEntry {
    /// When the entry was appended.
    pub timestamp: DateTime<Utc>,
    /// Entry severity.
    pub level: LogLevel,
    /// Free-text message.
    pub message: String,
}

impl DeploymentLogEntry {
    /// Create a log entry timestamped now.
    #[must_use]
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> DeploymentRecord {
        DeploymentRecord::new(
            ProjectId::new("proj"),
            EnvironmentId::new("env"),
            Some("abc123def".to_owned()),
            None,
        )
    }

    #[test]
    fn legal_transitions() {
        use DeploymentStatus::{Building, Cancelled, Failed, Pending, Success};

        assert!(Pending.can_transition_to(Building));
        assert!(Building.can_transition_to(Success));
        assert!(Building.can_transition_to(Failed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Building.can_transition_to(Cancelled));
    }

    #[test]
    fn illegal_transitions() {
        use DeploymentStatus::{Building, Cancelled, Failed, Pending, Success};

        assert!(!Pending.can_transition_to(Success));
        assert!(!Pending.can_transition_to(Failed));
        assert!(!Success.can_transition_to(Building));
        assert!(!Success.can_transition_to(Cancelled));
        assert!(!Failed.can_transition_to(Building));
        assert!(!Cancelled.can_transition_to(Pending));
        assert!(!Building.can_transition_to(Pending));
    }

    #[test]
    fn terminal_statuses() {
        assert!(!DeploymentStatus::Pending.is_terminal());
        assert!(!DeploymentStatus::Building.is_terminal());
        assert!(DeploymentStatus::Success.is_terminal());
        assert!(DeploymentStatus::Failed.is_terminal());
        assert!(DeploymentStatus::Cancelled.is_terminal());
    }

    #[test]
    fn success_update_sets_runtime_fields() {
        let mut rec = record();
        StatusUpdate::Building.apply_to(&mut rec);

        StatusUpdate::Success {
            duration_secs: 12.5,
            container_ref: ContainerRef::new("c0ffee"),
            host_port: 4100,
        }
        .apply_to(&mut rec);

        assert_eq!(rec.status, DeploymentStatus::Success);
        assert_eq!(rec.duration_secs, Some(12.5));
        assert_eq!(rec.host_port, Some(4100));
        assert_eq!(rec.container_ref.as_ref().unwrap().as_str(), "c0ffee");
        assert!(rec.error.is_none());
    }

    #[test]
    fn failed_update_sets_error() {
        let mut rec = record();
        StatusUpdate::Building.apply_to(&mut rec);

        StatusUpdate::Failed {
            duration_secs: 3.0,
            error: "clone failed".to_owned(),
        }
        .apply_to(&mut rec);

        assert_eq!(rec.status, DeploymentStatus::Failed);
        assert_eq!(rec.error.as_deref(), Some("clone failed"));
        assert!(rec.container_ref.is_none());
    }

    #[test]
    fn status_serde_names() {
        let json = serde_json::to_string(&DeploymentStatus::Building).unwrap();
        assert_eq!(json, "\"building\"");
        let level: LogLevel = serde_json::from_str("\"warning\"").unwrap();
        assert_eq!(level, LogLevel::Warning);
    }
}
