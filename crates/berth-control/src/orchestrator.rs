//! Core deployment orchestration logic.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use berth_core::{
    ContainerRef, DeploymentFilter, DeploymentId, DeploymentLogEntry, DeploymentRecord,
    DeploymentStore, Environment, EnvironmentId, EnvironmentStore, LogLevel, Project, ProjectId,
    ProjectStore, StatusUpdate, StoreError,
};

use crate::collaborators::{Builder, RouteProjector, Runtime};
use crate::error::{ControlError, ControlResult};
use crate::gate::{DeployGate, GatePermit};
use crate::registry::PipelineRegistry;

/// Request to create a new deployment.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    /// Target project.
    pub project_id: ProjectId,
    /// Target environment.
    pub environment_id: EnvironmentId,
    /// Revision to deploy; the project's default branch when absent.
    pub revision: Option<String>,
    /// Human-readable revision message, when the trigger knows it.
    pub message: Option<String>,
}

/// Query parameters for reading a deployment's log.
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    /// Only entries at this severity.
    pub level: Option<LogLevel>,
    /// Entries skipped from the start, for restartable pagination.
    pub offset: usize,
    /// Maximum entries returned (defaults to 100).
    pub limit: Option<usize>,
}

/// One page of a deployment's log.
#[derive(Debug)]
pub struct LogPage {
    /// Entries in chronological order.
    pub entries: Vec<DeploymentLogEntry>,
    /// Total entries matching the level filter, across all pages.
    pub total: usize,
    /// Distinct severities present in the full log.
    pub levels: Vec<LogLevel>,
}

const DEFAULT_LOG_LIMIT: usize = 100;

/// Orchestrates the deployment lifecycle.
///
/// `create` validates and records the deployment, then drives the
/// build/run pipeline in a spawned task. Pipelines are serialized per
/// (project, environment) by [`DeployGate`] and cancellable between
/// steps through [`PipelineRegistry`].
pub struct Orchestrator {
    deployments: Arc<dyn DeploymentStore>,
    projects: Arc<dyn ProjectStore>,
    environments: Arc<dyn EnvironmentStore>,
    builder: Arc<dyn Builder>,
    runtime: Arc<dyn Runtime>,
    routes: Arc<dyn RouteProjector>,
    gate: DeployGate,
    registry: PipelineRegistry,
}

impl Orchestrator {
    /// Create an orchestrator over its stores and collaborators.
    pub fn new(
        deployments: Arc<dyn DeploymentStore>,
        projects: Arc<dyn ProjectStore>,
        environments: Arc<dyn EnvironmentStore>,
        builder: Arc<dyn Builder>,
        runtime: Arc<dyn Runtime>,
        routes: Arc<dyn RouteProjector>,
    ) -> Self {
        Self {
            deployments,
            projects,
            environments,
            builder,
            runtime,
            routes,
            gate: DeployGate::new(),
            registry: PipelineRegistry::new(),
        }
    }

    /// Create a deployment and start its pipeline.
    ///
    /// Validates the target, inserts a `pending` record, and spawns
    /// the pipeline task; the record is returned before the pipeline
    /// runs. A pipeline already in flight for the same pair is a
    /// conflict, not a queue.
    pub async fn create(self: &Arc<Self>, request: DeployRequest) -> ControlResult<DeploymentRecord> {
        let project = self
            .projects
            .project(&request.project_id)
            .await?
            .ok_or_else(|| ControlError::NotFound {
                kind: "project",
                id: request.project_id.to_string(),
            })?;

        let environment = self
            .environments
            .environment(&request.environment_id)
            .await?
            .ok_or_else(|| ControlError::NotFound {
                kind: "environment",
                id: request.environment_id.to_string(),
            })?;

        if environment.project_id != project.id {
            return Err(ControlError::validation(format!(
                "environment {} does not belong to project {}",
                environment.id, project.id
            )));
        }
        if environment.deleted {
            return Err(ControlError::validation(format!(
                "environment {} is deleted",
                environment.id
            )));
        }

        let permit = self.gate.acquire(&project.id, &environment.id)?;

        let record = DeploymentRecord::new(
            project.id.clone(),
            environment.id.clone(),
            request.revision,
            request.message,
        );
        self.deployments.insert(&record).await?;
        self.deployments
            .append_log(&record.id, LogLevel::Info, "deployment created")
            .await?;

        let token = self.registry.register(&record.id);

        info!(
            deployment_id = %record.id,
            project = %project.id,
            environment = %environment.id,
            "deployment created, starting pipeline"
        );

        let orchestrator = Arc::clone(self);
        let spawned = record.clone();
        tokio::spawn(async move {
            orchestrator
                .execute_pipeline(spawned, project, environment, permit, token)
                .await;
        });

        Ok(record)
    }

    /// Drive one deployment through build, run, and route update.
    ///
    /// Every outcome lands on the record; this task never propagates
    /// errors. The cancellation token is consulted between steps only.
    async fn execute_pipeline(
        self: Arc<Self>,
        record: DeploymentRecord,
        project: Project,
        environment: Environment,
        permit: GatePermit,
        token: CancellationToken,
    ) {
        let started = Instant::now();
        self.run_pipeline(&record, &project, &environment, &token, started)
            .await;

        self.registry.remove(&record.id);
        drop(permit);
    }

    async fn run_pipeline(
        &self,
        record: &DeploymentRecord,
        project: &Project,
        environment: &Environment,
        token: &CancellationToken,
        started: Instant,
    ) {
        let id = &record.id;

        if token.is_cancelled() {
            self.mark_cancelled(id, None, None).await;
            return;
        }

        if let Err(e) = self.deployments.update_status(id, StatusUpdate::Building).await {
            error!(deployment_id = %id, error = %e, "failed to mark deployment building");
            return;
        }
        self.log(id, LogLevel::Info, "pipeline started").await;

        let revision = record
            .revision
            .as_deref()
            .or(Some(project.default_branch.as_str()));

        let output = match self
            .builder
            .build(&record.project_id, id, &project.repo_url, revision)
            .await
        {
            Ok(output) => output,
            Err(e) => {
                self.mark_failed(id, started, &e.to_string()).await;
                return;
            }
        };
        self.log(
            id,
            LogLevel::Info,
            &format!(
                "image built from {} ({})",
                &output.commit_sha[..12.min(output.commit_sha.len())],
                output.framework
            ),
        )
        .await;

        if token.is_cancelled() {
            self.mark_cancelled(id, None, Some(started)).await;
            return;
        }

        let running = match self
            .runtime
            .run(
                &output.image,
                &record.project_id,
                &record.environment_id,
                &environment.variables,
                output.framework,
            )
            .await
        {
            Ok(running) => running,
            Err(e) => {
                self.mark_failed(id, started, &e.to_string()).await;
                return;
            }
        };

        if token.is_cancelled() {
            self.mark_cancelled(id, Some(&running.container_ref), Some(started))
                .await;
            return;
        }

        let update = StatusUpdate::Success {
            duration_secs: started.elapsed().as_secs_f64(),
            container_ref: running.container_ref.clone(),
            host_port: running.host_port,
        };
        if let Err(e) = self.deployments.update_status(id, update).await {
            error!(deployment_id = %id, error = %e, "failed to mark deployment successful");
            return;
        }
        self.log(
            id,
            LogLevel::Info,
            &format!("deployment succeeded, listening on port {}", running.host_port),
        )
        .await;
        info!(deployment_id = %id, host_port = running.host_port, "deployment succeeded");

        // Route refresh is a projection over successful deployments;
        // its failure never fails the deployment.
        if let Err(e) = self.routes.refresh().await {
            warn!(deployment_id = %id, error = %e, "route table refresh failed");
            self.log(
                id,
                LogLevel::Warning,
                &format!("route table refresh failed: {e}"),
            )
            .await;
        }
    }

    async fn mark_failed(&self, id: &DeploymentId, started: Instant, message: &str) {
        error!(deployment_id = %id, error = %message, "deployment failed");
        self.log(id, LogLevel::Error, message).await;

        let update = StatusUpdate::Failed {
            duration_secs: started.elapsed().as_secs_f64(),
            error: message.to_owned(),
        };
        if let Err(e) = self.deployments.update_status(id, update).await {
            error!(deployment_id = %id, error = %e, "failed to record deployment failure");
        }
    }

    async fn mark_cancelled(
        &self,
        id: &DeploymentId,
        container: Option<&ContainerRef>,
        started: Option<Instant>,
    ) {
        if let Some(container) = container {
            if let Err(e) = self.runtime.stop(container).await {
                warn!(deployment_id = %id, error = %e, "failed to stop container of cancelled deployment");
            }
        }

        let update = StatusUpdate::Cancelled {
            duration_secs: started.map(|s| s.elapsed().as_secs_f64()),
        };
        if let Err(e) = self.deployments.update_status(id, update).await {
            error!(deployment_id = %id, error = %e, "failed to mark deployment cancelled");
            return;
        }
        self.log(id, LogLevel::Info, "deployment cancelled").await;
        info!(deployment_id = %id, "deployment cancelled");
    }

    async fn log(&self, id: &DeploymentId, level: LogLevel, message: &str) {
        if let Err(e) = self.deployments.append_log(id, level, message).await {
            warn!(deployment_id = %id, error = %e, "failed to append deployment log");
        }
    }

    /// Request cancellation of a live deployment.
    ///
    /// Legal only while the deployment is non-terminal. The pipeline
    /// observes the token at its next step boundary; a step already in
    /// flight runs to completion first.
    pub async fn cancel(&self, id: &DeploymentId) -> ControlResult<()> {
        let record = self.require(id).await?;

        if record.is_terminal() {
            return Err(ControlError::validation(format!(
                "deployment is already terminal ({})",
                record.status
            )));
        }

        self.log(id, LogLevel::Info, "cancellation requested").await;

        if !self.registry.cancel(id) {
            // No live pipeline holds a token (e.g. after a restart);
            // the record moves to cancelled directly.
            self.deployments
                .update_status(id, StatusUpdate::Cancelled { duration_secs: None })
                .await?;
            self.log(id, LogLevel::Info, "deployment cancelled").await;
        }

        info!(deployment_id = %id, "cancellation requested");
        Ok(())
    }

    /// Locate the previous successful deployment for the same pair.
    ///
    /// Best-effort stops the given deployment's container and returns
    /// the prior record. It does not restart the prior container; the
    /// caller redeploys the returned revision to bring it back.
    pub async fn rollback(&self, id: &DeploymentId) -> ControlResult<DeploymentRecord> {
        let record = self.require(id).await?;

        let prior = self
            .deployments
            .latest_success_before(&record.project_id, &record.environment_id, record.created_at)
            .await?
            .ok_or_else(|| {
                ControlError::validation("no previous successful deployment found")
            })?;

        if let Some(container) = &record.container_ref {
            if let Err(e) = self.runtime.stop(container).await {
                warn!(deployment_id = %id, error = %e, "failed to stop container during rollback");
                self.log(
                    id,
                    LogLevel::Warning,
                    &format!("failed to stop container during rollback: {e}"),
                )
                .await;
            }
        }

        self.log(
            id,
            LogLevel::Info,
            &format!("rolled back; previous successful deployment is {}", prior.id),
        )
        .await;
        info!(deployment_id = %id, prior_id = %prior.id, "rollback located prior deployment");

        Ok(prior)
    }

    /// Get a deployment by ID.
    pub async fn get(&self, id: &DeploymentId) -> ControlResult<Option<DeploymentRecord>> {
        Ok(self.deployments.get(id).await?)
    }

    /// List deployments matching a filter, newest first.
    pub async fn list(&self, filter: &DeploymentFilter) -> ControlResult<Vec<DeploymentRecord>> {
        Ok(self.deployments.list(filter).await?)
    }

    /// Read one page of a deployment's log.
    pub async fn get_logs(&self, id: &DeploymentId, query: &LogQuery) -> ControlResult<LogPage> {
        self.require(id).await?;
        let all = self.deployments.logs(id).await?;

        let levels: BTreeSet<LogLevel> = all.iter().map(|entry| entry.level).collect();

        let filtered: Vec<DeploymentLogEntry> = all
            .into_iter()
            .filter(|entry| query.level.map_or(true, |level| entry.level == level))
            .collect();
        let total = filtered.len();

        let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT);
        let entries = filtered
            .into_iter()
            .skip(query.offset)
            .take(limit)
            .collect();

        Ok(LogPage {
            entries,
            total,
            levels: levels.into_iter().collect(),
        })
    }

    async fn require(&self, id: &DeploymentId) -> ControlResult<DeploymentRecord> {
        self.deployments
            .get(id)
            .await?
            .ok_or_else(|| ControlError::from(StoreError::deployment_not_found(id)))
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator").finish_non_exhaustive()
    }
}
