//! Collaborator seams for the pipeline.
//!
//! The orchestrator drives the image builder, the container runtime,
//! and the route table through these traits so tests can substitute
//! in-memory fakes. The real implementations are thin delegations.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use berth_build::{BuildError, BuildOutput, ImageBuilder};
use berth_core::{ContainerRef, DeploymentId, EnvVar, EnvironmentId, Framework, ImageHandle, ProjectId};
use berth_runtime::{ContainerRuntime, RunningContainer, RuntimeError};

use crate::error::{ControlError, ControlResult};

/// Builds a container image from a project revision.
#[async_trait]
pub trait Builder: Send + Sync {
    /// Build an image for a deployment.
    async fn build(
        &self,
        project_id: &ProjectId,
        deployment_id: &DeploymentId,
        repo_url: &str,
        revision: Option<&str>,
    ) -> Result<BuildOutput, BuildError>;
}

#[async_trait]
impl Builder for ImageBuilder {
    async fn build(
        &self,
        project_id: &ProjectId,
        deployment_id: &DeploymentId,
        repo_url: &str,
        revision: Option<&str>,
    ) -> Result<BuildOutput, BuildError> {
        ImageBuilder::build(self, project_id, deployment_id, repo_url, revision).await
    }
}

/// Runs and stops container instances.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Start a container for a deployment.
    async fn run(
        &self,
        image: &ImageHandle,
        project_id: &ProjectId,
        environment_id: &EnvironmentId,
        env_vars: &[EnvVar],
        framework: Framework,
    ) -> Result<RunningContainer, RuntimeError>;

    /// Stop and remove a container. Idempotent.
    async fn stop(&self, container: &ContainerRef) -> Result<(), RuntimeError>;
}

#[async_trait]
impl Runtime for ContainerRuntime {
    async fn run(
        &self,
        image: &ImageHandle,
        project_id: &ProjectId,
        environment_id: &EnvironmentId,
        env_vars: &[EnvVar],
        framework: Framework,
    ) -> Result<RunningContainer, RuntimeError> {
        ContainerRuntime::run(self, image, project_id, environment_id, env_vars, framework).await
    }

    async fn stop(&self, container: &ContainerRef) -> Result<(), RuntimeError> {
        ContainerRuntime::stop(self, container).await
    }
}

/// Recomputes and applies the route table projection.
///
/// Invoked after a successful pipeline; failures are reported to the
/// caller, which records them as warnings without failing the
/// deployment.
#[async_trait]
pub trait RouteProjector: Send + Sync {
    /// Recompute the route table and apply it to the proxy.
    async fn refresh(&self) -> ControlResult<()>;
}

/// Route projector that does nothing, for setups without a proxy.
#[derive(Debug, Default)]
pub struct NoopRouteProjector;

#[async_trait]
impl RouteProjector for NoopRouteProjector {
    async fn refresh(&self) -> ControlResult<()> {
        Ok(())
    }
}

/// In-memory builder fake for orchestrator tests.
#[derive(Debug, Default)]
pub struct MockBuilder {
    /// When set, every build fails with this clone error message.
    pub fail_clone: Option<String>,
    /// Framework reported on success.
    pub framework: Option<Framework>,
    builds: Mutex<Vec<DeploymentId>>,
}

impl MockBuilder {
    /// Builder that always fails to clone.
    #[must_use]
    pub fn failing_clone(message: impl Into<String>) -> Self {
        Self {
            fail_clone: Some(message.into()),
            ..Self::default()
        }
    }

    /// Deployments built so far.
    #[must_use]
    pub fn builds(&self) -> Vec<DeploymentId> {
        self.builds.lock().expect("mock lock").clone()
    }
}

#[async_trait]
impl Builder for MockBuilder {
    async fn build(
        &self,
        project_id: &ProjectId,
        deployment_id: &DeploymentId,
        repo_url: &str,
        _revision: Option<&str>,
    ) -> Result<BuildOutput, BuildError> {
        if let Some(message) = &self.fail_clone {
            return Err(BuildError::GitClone {
                url: repo_url.to_owned(),
                message: message.clone(),
            });
        }

        self.builds
            .lock()
            .expect("mock lock")
            .push(deployment_id.clone());

        Ok(BuildOutput {
            image: ImageHandle::new(format!("berth/{project_id}:{deployment_id}")),
            framework: self.framework.unwrap_or(Framework::BackendService),
            commit_sha: "aaaabbbbccccddddeeeeffff0000111122223333".to_owned(),
            commit_summary: Some("mock commit".to_owned()),
        })
    }
}

/// In-memory runtime fake for orchestrator tests.
#[derive(Debug, Default)]
pub struct MockRuntime {
    /// When true, `run` fails.
    pub fail_run: bool,
    pub(crate) next_port: AtomicU16,
    pub(crate) started: Mutex<Vec<(ContainerRef, Vec<EnvVar>)>>,
    pub(crate) stopped: Mutex<Vec<ContainerRef>>,
}

impl MockRuntime {
    /// Containers started so far, with their injected variables.
    #[must_use]
    pub fn started(&self) -> Vec<(ContainerRef, Vec<EnvVar>)> {
        self.started.lock().expect("mock lock").clone()
    }

    /// Containers stopped so far.
    #[must_use]
    pub fn stopped(&self) -> Vec<ContainerRef> {
        self.stopped.lock().expect("mock lock").clone()
    }
}

#[async_trait]
impl Runtime for MockRuntime {
    async fn run(
        &self,
        _image: &ImageHandle,
        project_id: &ProjectId,
        environment_id: &EnvironmentId,
        env_vars: &[EnvVar],
        _framework: Framework,
    ) -> Result<RunningContainer, RuntimeError> {
        if self.fail_run {
            return Err(RuntimeError::StartFailed {
                name: format!("berth-{project_id}-{environment_id}"),
                message: "mock start failure".to_owned(),
            });
        }

        let n = self.next_port.fetch_add(1, Ordering::SeqCst);
        let container_ref = ContainerRef::new(format!("mock-container-{n}"));
        self.started
            .lock()
            .expect("mock lock")
            .push((container_ref.clone(), env_vars.to_vec()));

        Ok(RunningContainer {
            container_ref,
            host_port: 4100 + n,
        })
    }

    async fn stop(&self, container: &ContainerRef) -> Result<(), RuntimeError> {
        self.stopped
            .lock()
            .expect("mock lock")
            .push(container.clone());
        Ok(())
    }
}

/// Route projector fake that counts refreshes.
#[derive(Debug, Default)]
pub struct MockRouteProjector {
    /// When true, every refresh fails.
    pub fail: bool,
    pub(crate) refreshes: Mutex<u32>,
}

impl MockRouteProjector {
    /// Number of refreshes observed.
    #[must_use]
    pub fn refreshes(&self) -> u32 {
        *self.refreshes.lock().expect("mock lock")
    }
}

#[async_trait]
impl RouteProjector for MockRouteProjector {
    async fn refresh(&self) -> ControlResult<()> {
        *self.refreshes.lock().expect("mock lock") += 1;
        if self.fail {
            return Err(ControlError::internal("mock proxy reload failure"));
        }
        Ok(())
    }
}
