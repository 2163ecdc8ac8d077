//! HTTP API for the orchestrator.
//!
//! Provides endpoints for:
//! - Deployment management (create, query, list, logs)
//! - Rollback and cancellation
//! - Health checks

mod deployments;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::orchestrator::Orchestrator;

pub use deployments::{
    CreateDeploymentRequest, DeploymentResponse, ListDeploymentsQuery, LogsQuery, LogsResponse,
};

/// Shared application state for the orchestrator API.
#[derive(Clone)]
pub struct AppState {
    /// The orchestrator driving deployments.
    pub orchestrator: Arc<Orchestrator>,
}

/// Creates the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/deployments", post(deployments::create_deployment))
        .route("/deployments", get(deployments::list_deployments))
        .route("/deployments/{id}", get(deployments::get_deployment))
        .route("/deployments/{id}/logs", get(deployments::get_logs))
        .route(
            "/deployments/{id}/rollback",
            post(deployments::rollback_deployment),
        )
        .route(
            "/deployments/{id}/cancel",
            post(deployments::cancel_deployment),
        )
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> axum::Json<HealthResponse> {
    axum::Json(HealthResponse { status: "healthy" })
}

/// Health response.
#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
}
