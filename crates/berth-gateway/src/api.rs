//! HTTP surface for webhook ingestion.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use tracing::info;

use berth_control::ControlError;
use berth_core::ProjectId;

use crate::error::GatewayError;
use crate::webhook::{WebhookHandler, WebhookOutcome};

const SIGNATURE_HEADER: &str = "x-hub-signature-256";
const EVENT_HEADER: &str = "x-github-event";

/// Shared application state for the webhook API.
#[derive(Clone)]
pub struct AppState {
    /// The webhook handler.
    pub handler: Arc<WebhookHandler>,
}

/// Creates the webhook router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/{project_id}", post(receive_webhook))
        .with_state(state)
}

/// Response for an accepted push.
#[derive(Debug, Serialize)]
pub struct PushAcceptedResponse {
    /// The created deployment.
    pub deployment_id: String,
}

/// Response for acknowledged non-push events.
#[derive(Debug, Serialize)]
pub struct AckResponse {
    /// Human-readable acknowledgement.
    pub message: String,
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

async fn receive_webhook(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, axum::response::Response), ApiError> {
    let event = headers
        .get(EVENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: format!("missing {EVENT_HEADER} header"),
                }),
            )
        })?;
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());

    let outcome = state
        .handler
        .handle(&ProjectId::new(&project_id), event, signature, &body)
        .await
        .map_err(into_api_error)?;

    let response = match outcome {
        WebhookOutcome::Deployed { deployment_id } => {
            info!(project_id = %project_id, deployment_id = %deployment_id, "webhook deployment accepted");
            (
                StatusCode::ACCEPTED,
                axum::response::IntoResponse::into_response(Json(PushAcceptedResponse {
                    deployment_id: deployment_id.to_string(),
                })),
            )
        }
        WebhookOutcome::Pong => (
            StatusCode::OK,
            axum::response::IntoResponse::into_response(Json(AckResponse {
                message: "pong".to_owned(),
            })),
        ),
        WebhookOutcome::Ignored { event } => (
            StatusCode::OK,
            axum::response::IntoResponse::into_response(Json(AckResponse {
                message: format!("event {event} ignored"),
            })),
        ),
    };

    Ok(response)
}

fn into_api_error(error: GatewayError) -> ApiError {
    let status = match &error {
        GatewayError::SignatureMismatch | GatewayError::SecretNotConfigured(_) => {
            StatusCode::UNAUTHORIZED
        }
        GatewayError::ProjectNotFound(_) => StatusCode::NOT_FOUND,
        GatewayError::Payload(_) | GatewayError::NoEnvironment(_) => StatusCode::BAD_REQUEST,
        GatewayError::Control(ControlError::DeploymentInFlight { .. }) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use berth_control::collaborators::{
        Builder, MockBuilder, MockRouteProjector, MockRuntime, RouteProjector, Runtime,
    };
    use berth_control::Orchestrator;
    use berth_core::{
        DeploymentStore, Environment, EnvironmentStore, MemoryStore, Project, ProjectStore,
    };

    use crate::webhook::{sign, TargetPolicy};

    fn make_app() -> Router {
        let store = Arc::new(MemoryStore::new());

        let project = Project {
            id: ProjectId::new("proj-1"),
            name: "demo".to_owned(),
            repo_url: "https://example.com/demo.git".to_owned(),
            default_branch: "main".to_owned(),
            webhook_secret: Some("shhh-secret".to_owned()),
        };
        store.put_project(project.clone());
        store.put_environment(Environment::new(project.id, "production"));

        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&store) as Arc<dyn DeploymentStore>,
            Arc::clone(&store) as Arc<dyn ProjectStore>,
            Arc::clone(&store) as Arc<dyn EnvironmentStore>,
            Arc::new(MockBuilder::default()) as Arc<dyn Builder>,
            Arc::new(MockRuntime::default()) as Arc<dyn Runtime>,
            Arc::new(MockRouteProjector::default()) as Arc<dyn RouteProjector>,
        ));

        let handler = Arc::new(WebhookHandler::new(
            Arc::clone(&store) as Arc<dyn ProjectStore>,
            Arc::clone(&store) as Arc<dyn EnvironmentStore>,
            orchestrator,
            TargetPolicy::FirstByName,
        ));

        router(AppState { handler })
    }

    fn push_body() -> Vec<u8> {
        serde_json::json!({
            "ref": "refs/heads/main",
            "after": "aaaabbbbccccddddeeeeffff0000111122223333",
            "head_commit": {
                "id": "aaaabbbbccccddddeeeeffff0000111122223333",
                "message": "update styles"
            }
        })
        .to_string()
        .into_bytes()
    }

    fn push_request(signature: &str, body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/webhooks/proj-1")
            .header(EVENT_HEADER, "push")
            .header(SIGNATURE_HEADER, signature)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn signed_push_is_accepted() {
        let app = make_app();
        let body = push_body();
        let signature = sign(b"shhh-secret", &body);

        let response = app.oneshot(push_request(&signature, body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn bad_signature_is_unauthorized() {
        let app = make_app();
        let body = push_body();
        let signature = sign(b"wrong-secret", &body);

        let response = app.oneshot(push_request(&signature, body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn ping_is_acknowledged() {
        let app = make_app();
        let body = b"{}".to_vec();
        let signature = sign(b"shhh-secret", &body);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhooks/proj-1")
                    .header(EVENT_HEADER, "ping")
                    .header(SIGNATURE_HEADER, signature)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_event_header_is_bad_request() {
        let app = make_app();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhooks/proj-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_project_is_not_found() {
        let app = make_app();
        let body = push_body();
        let signature = sign(b"shhh-secret", &body);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhooks/ghost")
                    .header(EVENT_HEADER, "push")
                    .header(SIGNATURE_HEADER, signature)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
