//! Identifier newtypes and shared vocabulary.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Create an ID from a string.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generate a new unique ID.
            #[must_use]
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            /// Return the ID as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

id_type! {
    /// Unique identifier for a deployment.
    DeploymentId
}

id_type! {
    /// Unique identifier for a project.
    ProjectId
}

id_type! {
    /// Unique identifier for an environment within a project.
    EnvironmentId
}

/// Opaque reference to a container instance managed by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerRef(String);

impl ContainerRef {
    /// Create a container reference from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the reference as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Return a short version of the reference (first 12 characters).
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle to a built, runnable container image.
///
/// Handles are unique per build and never reused across deployments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageHandle(String);

impl ImageHandle {
    /// Create an image handle from a string.
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Return the handle as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Application framework detected from a project's manifest.
///
/// The builder detects the framework to pick a build recipe; the
/// runtime uses it to pick the in-container listening port convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framework {
    /// Static site served by a plain web server.
    StaticSite,
    /// Long-running backend service with its own router.
    BackendService,
    /// No known marker matched; built and run with generic defaults.
    Generic,
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StaticSite => write!(f, "static-site"),
            Self::BackendService => write!(f, "backend-service"),
            Self::Generic => write!(f, "generic"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(DeploymentId::generate(), DeploymentId::generate());
        assert_ne!(ProjectId::generate(), ProjectId::generate());
    }

    #[test]
    fn container_ref_short() {
        let long = ContainerRef::new("0123456789abcdef0123");
        assert_eq!(long.short(), "0123456789ab");

        let tiny = ContainerRef::new("abc");
        assert_eq!(tiny.short(), "abc");
    }

    #[test]
    fn framework_serde_names() {
        let json = serde_json::to_string(&Framework::StaticSite).unwrap();
        assert_eq!(json, "\"static_site\"");
        assert_eq!(Framework::BackendService.to_string(), "backend-service");
    }
}
