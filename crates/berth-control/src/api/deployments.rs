//! Deployment management endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use berth_core::{
    DeploymentFilter, DeploymentId, DeploymentLogEntry, DeploymentRecord, DeploymentStatus,
    EnvironmentId, LogLevel, ProjectId, StoreError,
};

use crate::error::ControlError;
use crate::orchestrator::{DeployRequest, LogQuery};

use super::AppState;

/// Request to create a new deployment.
#[derive(Debug, Deserialize)]
pub struct CreateDeploymentRequest {
    /// Project identifier.
    pub project_id: String,
    /// Environment identifier.
    pub environment_id: String,
    /// Revision to deploy; the project's default branch when absent.
    pub revision: Option<String>,
    /// Human-readable revision message.
    pub message: Option<String>,
}

/// Query parameters for listing deployments.
#[derive(Debug, Default, Deserialize)]
pub struct ListDeploymentsQuery {
    /// Filter by project ID.
    pub project_id: Option<String>,
    /// Filter by environment ID.
    pub environment_id: Option<String>,
    /// Filter by status.
    pub status: Option<String>,
}

/// Query parameters for reading a deployment's log.
#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    /// Only entries at this severity.
    pub level: Option<String>,
    /// Entries skipped from the start.
    pub offset: Option<usize>,
    /// Maximum entries returned.
    pub limit: Option<usize>,
}

/// Response for a deployment.
#[derive(Debug, Serialize)]
pub struct DeploymentResponse {
    /// Deployment ID.
    pub id: String,
    /// Project ID.
    pub project_id: String,
    /// Environment ID.
    pub environment_id: String,
    /// Requested revision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    /// Revision message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision_message: Option<String>,
    /// Current status.
    pub status: String,
    /// Pipeline duration in seconds, once terminal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    /// Allocated host port, on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,
    /// Error message, on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Creation timestamp.
    pub created_at: String,
    /// Last update timestamp.
    pub updated_at: String,
}

/// Response for a deployment's log page.
#[derive(Debug, Serialize)]
pub struct LogsResponse {
    /// Entries in chronological order.
    pub entries: Vec<LogEntryResponse>,
    /// Total entries matching the filter.
    pub total: usize,
    /// Distinct severities present in the full log.
    pub levels: Vec<String>,
}

/// A single log entry.
#[derive(Debug, Serialize)]
pub struct LogEntryResponse {
    /// Entry timestamp.
    pub timestamp: String,
    /// Entry severity.
    pub level: String,
    /// Free-text message.
    pub message: String,
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Create a new deployment.
pub async fn create_deployment(
    State(state): State<AppState>,
    Json(request): Json<CreateDeploymentRequest>,
) -> Result<(StatusCode, Json<DeploymentResponse>), ApiError> {
    info!(
        project_id = %request.project_id,
        environment_id = %request.environment_id,
        "creating deployment via API"
    );

    let deploy = DeployRequest {
        project_id: ProjectId::new(&request.project_id),
        environment_id: EnvironmentId::new(&request.environment_id),
        revision: request.revision,
        message: request.message,
    };

    match state.orchestrator.create(deploy).await {
        Ok(record) => Ok((StatusCode::ACCEPTED, Json(record_to_response(record)))),
        Err(e) => Err(into_api_error(e)),
    }
}

/// Get a deployment by ID.
pub async fn get_deployment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeploymentResponse>, ApiError> {
    let deployment_id = DeploymentId::new(&id);

    match state.orchestrator.get(&deployment_id).await {
        Ok(Some(record)) => Ok(Json(record_to_response(record))),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("deployment not found: {id}"),
            }),
        )),
        Err(e) => Err(into_api_error(e)),
    }
}

/// List deployments with optional filters.
pub async fn list_deployments(
    State(state): State<AppState>,
    Query(query): Query<ListDeploymentsQuery>,
) -> Result<Json<Vec<DeploymentResponse>>, ApiError> {
    let mut filter = DeploymentFilter::new();

    if let Some(project_id) = query.project_id {
        filter = filter.with_project(ProjectId::new(&project_id));
    }
    if let Some(environment_id) = query.environment_id {
        filter = filter.with_environment(EnvironmentId::new(&environment_id));
    }
    if let Some(status) = query.status {
        if let Some(parsed) = parse_status(&status) {
            filter = filter.with_status(parsed);
        }
    }

    match state.orchestrator.list(&filter).await {
        Ok(records) => Ok(Json(records.into_iter().map(record_to_response).collect())),
        Err(e) => Err(into_api_error(e)),
    }
}

/// Read one page of a deployment's log.
pub async fn get_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<LogsResponse>, ApiError> {
    let deployment_id = DeploymentId::new(&id);

    let log_query = LogQuery {
        level: query.level.as_deref().and_then(parse_level),
        offset: query.offset.unwrap_or(0),
        limit: query.limit,
    };

    match state.orchestrator.get_logs(&deployment_id, &log_query).await {
        Ok(page) => Ok(Json(LogsResponse {
            entries: page.entries.into_iter().map(entry_to_response).collect(),
            total: page.total,
            levels: page.levels.iter().map(ToString::to_string).collect(),
        })),
        Err(e) => Err(into_api_error(e)),
    }
}

/// Locate the previous successful deployment and stop the current
/// container.
pub async fn rollback_deployment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeploymentResponse>, ApiError> {
    let deployment_id = DeploymentId::new(&id);

    info!(deployment_id = %id, "rollback requested via API");

    match state.orchestrator.rollback(&deployment_id).await {
        Ok(prior) => Ok(Json(record_to_response(prior))),
        Err(e) => Err(into_api_error(e)),
    }
}

/// Request cancellation of a live deployment.
pub async fn cancel_deployment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let deployment_id = DeploymentId::new(&id);

    info!(deployment_id = %id, "cancellation requested via API");

    match state.orchestrator.cancel(&deployment_id).await {
        Ok(()) => Ok(StatusCode::ACCEPTED),
        Err(e) => Err(into_api_error(e)),
    }
}

fn record_to_response(record: DeploymentRecord) -> DeploymentResponse {
    DeploymentResponse {
        id: record.id.to_string(),
        project_id: record.project_id.to_string(),
        environment_id: record.environment_id.to_string(),
        revision: record.revision,
        revision_message: record.revision_message,
        status: record.status.to_string(),
        duration_secs: record.duration_secs,
        host_port: record.host_port,
        error: record.error,
        created_at: record.created_at.to_rfc3339(),
        updated_at: record.updated_at.to_rfc3339(),
    }
}

fn entry_to_response(entry: DeploymentLogEntry) -> LogEntryResponse {
    LogEntryResponse {
        timestamp: entry.timestamp.to_rfc3339(),
        level: entry.level.to_string(),
        message: entry.message,
    }
}

fn into_api_error(error: ControlError) -> ApiError {
    let status = error_to_status(&error);
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

fn error_to_status(error: &ControlError) -> StatusCode {
    match error {
        ControlError::NotFound { .. } | ControlError::Store(StoreError::NotFound { .. }) => {
            StatusCode::NOT_FOUND
        }
        ControlError::Validation(_) => StatusCode::BAD_REQUEST,
        ControlError::DeploymentInFlight { .. }
        | ControlError::Store(StoreError::InvalidTransition { .. }) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn parse_status(s: &str) -> Option<DeploymentStatus> {
    match s.to_lowercase().as_str() {
        "pending" => Some(DeploymentStatus::Pending),
        "building" => Some(DeploymentStatus::Building),
        "success" => Some(DeploymentStatus::Success),
        "failed" => Some(DeploymentStatus::Failed),
        "cancelled" => Some(DeploymentStatus::Cancelled),
        _ => None,
    }
}

fn parse_level(s: &str) -> Option<LogLevel> {
    match s.to_lowercase().as_str() {
        "debug" => Some(LogLevel::Debug),
        "info" => Some(LogLevel::Info),
        "warning" => Some(LogLevel::Warning),
        "error" => Some(LogLevel::Error),
        _ => None,
    }
}
