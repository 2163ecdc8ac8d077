//! Project and environment collaborator models.
//!
//! These records are owned by the wider platform's CRUD layer; the
//! deployment core only reads them. They carry exactly the fields the
//! pipeline needs: where the source lives, which variables to inject,
//! and which domain the proxy should route.

use serde::{Deserialize, Serialize};

use crate::types::{EnvironmentId, ProjectId};

/// A project: a source repository deployable to one or more environments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Unique project identifier.
    pub id: ProjectId,
    /// Display name.
    pub name: String,
    /// Git repository URL (HTTPS or SSH).
    pub repo_url: String,
    /// Branch deployed when no revision is given.
    pub default_branch: String,
    /// Shared secret for webhook signature verification, once generated.
    pub webhook_secret: Option<String>,
}

/// A single environment variable injected verbatim into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    /// Variable name.
    pub name: String,
    /// Variable value.
    pub value: String,
}

impl EnvVar {
    /// Create a variable.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A deployment target within a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    /// Unique environment identifier.
    pub id: EnvironmentId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Environment name (e.g. "production", "staging").
    pub name: String,
    /// Public hostname routed to this environment's container.
    pub domain: Option<String>,
    /// Variables injected into the container at run time.
    pub variables: Vec<EnvVar>,
    /// Soft-delete marker; deleted environments are never deploy targets.
    pub deleted: bool,
}

impl Environment {
    /// Create an environment with no domain or variables.
    #[must_use]
    pub fn new(project_id: ProjectId, name: impl Into<String>) -> Self {
        Self {
            id: EnvironmentId::generate(),
            project_id,
            name: name.into(),
            domain: None,
            variables: Vec::new(),
            deleted: false,
        }
    }

    /// Set the public domain.
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Add an injected variable.
    #[must_use]
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.push(EnvVar::new(name, value));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_builder() {
        let env = Environment::new(ProjectId::new("p1"), "production")
            .with_domain("app.example.com")
            .with_variable("APP_NAME", "demo");

        assert_eq!(env.name, "production");
        assert_eq!(env.domain.as_deref(), Some("app.example.com"));
        assert_eq!(env.variables, vec![EnvVar::new("APP_NAME", "demo")]);
        assert!(!env.deleted);
    }
}
