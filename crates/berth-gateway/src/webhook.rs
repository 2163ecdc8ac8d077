//! Webhook ingestion.
//!
//! Inbound push notifications are authenticated with an HMAC-SHA256
//! signature over the raw body before any parsing happens. A verified
//! push becomes a pending deployment through the orchestrator; the
//! HTTP response returns before the pipeline completes.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, info, instrument};

use berth_control::{DeployRequest, Orchestrator};
use berth_core::{DeploymentId, Environment, EnvironmentStore, ProjectId, ProjectStore};

use crate::error::{GatewayError, GatewayResult};

type HmacSha256 = Hmac<Sha256>;

/// How the target environment is chosen for a webhook push.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "policy", content = "name")]
pub enum TargetPolicy {
    /// First non-deleted environment in name order.
    #[default]
    FirstByName,
    /// The environment with this exact name.
    Named(String),
}

/// Outcome of an ingested webhook.
#[derive(Debug, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// A push event created a deployment.
    Deployed {
        /// The created deployment.
        deployment_id: DeploymentId,
    },
    /// A ping event was acknowledged.
    Pong,
    /// An event type we do not act on.
    Ignored {
        /// The event name as received.
        event: String,
    },
}

/// Push event payload, as sent by the source-control host.
#[derive(Debug, Deserialize)]
struct PushEvent {
    #[serde(rename = "ref")]
    git_ref: String,
    after: Option<String>,
    head_commit: Option<HeadCommit>,
}

#[derive(Debug, Deserialize)]
struct HeadCommit {
    id: String,
    message: Option<String>,
}

/// Ingests webhooks and hands verified pushes to the orchestrator.
pub struct WebhookHandler {
    projects: Arc<dyn ProjectStore>,
    environments: Arc<dyn EnvironmentStore>,
    orchestrator: Arc<Orchestrator>,
    policy: TargetPolicy,
}

impl WebhookHandler {
    /// Create a handler with the given target-resolution policy.
    pub fn new(
        projects: Arc<dyn ProjectStore>,
        environments: Arc<dyn EnvironmentStore>,
        orchestrator: Arc<Orchestrator>,
        policy: TargetPolicy,
    ) -> Self {
        Self {
            projects,
            environments,
            orchestrator,
            policy,
        }
    }

    /// Authenticate and dispatch one webhook delivery.
    ///
    /// The signature is verified over the raw body before the payload
    /// is parsed. On any verification failure no deployment record is
    /// created.
    #[instrument(skip(self, raw_body, signature_header), fields(project = %project_id, event))]
    pub async fn handle(
        &self,
        project_id: &ProjectId,
        event: &str,
        signature_header: Option<&str>,
        raw_body: &[u8],
    ) -> GatewayResult<WebhookOutcome> {
        let project = self
            .projects
            .project(project_id)
            .await
            .map_err(|e| GatewayError::Control(e.into()))?
            .ok_or_else(|| GatewayError::ProjectNotFound(project_id.to_string()))?;

        let secret = project
            .webhook_secret
            .as_deref()
            .ok_or_else(|| GatewayError::SecretNotConfigured(project_id.to_string()))?;

        verify_signature(secret.as_bytes(), raw_body, signature_header)?;

        match event {
            "push" => self.handle_push(&project.id, raw_body).await,
            "ping" => {
                debug!("webhook ping acknowledged");
                Ok(WebhookOutcome::Pong)
            }
            other => {
                debug!(event = other, "ignoring webhook event");
                Ok(WebhookOutcome::Ignored {
                    event: other.to_owned(),
                })
            }
        }
    }

    async fn handle_push(
        &self,
        project_id: &ProjectId,
        raw_body: &[u8],
    ) -> GatewayResult<WebhookOutcome> {
        let push: PushEvent =
            serde_json::from_slice(raw_body).map_err(|e| GatewayError::Payload(e.to_string()))?;

        let branch = push
            .git_ref
            .strip_prefix("refs/heads/")
            .ok_or_else(|| GatewayError::Payload(format!("not a branch ref: {}", push.git_ref)))?;

        let (revision, message) = match push.head_commit {
            Some(commit) => (commit.id, commit.message),
            None => (
                push.after
                    .ok_or_else(|| GatewayError::Payload("push without head revision".to_owned()))?,
                None,
            ),
        };

        let environment = self.resolve_environment(project_id).await?;

        info!(
            branch,
            revision = %revision,
            environment = %environment.id,
            "webhook push accepted"
        );

        let record = self
            .orchestrator
            .create(DeployRequest {
                project_id: project_id.clone(),
                environment_id: environment.id,
                revision: Some(revision),
                message,
            })
            .await?;

        Ok(WebhookOutcome::Deployed {
            deployment_id: record.id,
        })
    }

    async fn resolve_environment(&self, project_id: &ProjectId) -> GatewayResult<Environment> {
        let environments = self
            .environments
            .list_for_project(project_id)
            .await
            .map_err(|e| GatewayError::Control(e.into()))?;

        let chosen = match &self.policy {
            TargetPolicy::FirstByName => environments.into_iter().next(),
            TargetPolicy::Named(name) => environments.into_iter().find(|env| &env.name == name),
        };

        chosen.ok_or_else(|| GatewayError::NoEnvironment(project_id.to_string()))
    }
}

/// Verify a `sha256=<hex>` signature header over the raw payload.
///
/// The comparison goes through [`Mac::verify_slice`], which is
/// constant-time.
pub fn verify_signature(
    secret: &[u8],
    payload: &[u8],
    signature_header: Option<&str>,
) -> GatewayResult<()> {
    let header = signature_header.ok_or(GatewayError::SignatureMismatch)?;
    let hex_digest = header
        .strip_prefix("sha256=")
        .ok_or(GatewayError::SignatureMismatch)?;
    let claimed = hex::decode(hex_digest).map_err(|_| GatewayError::SignatureMismatch)?;

    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|_| GatewayError::SignatureMismatch)?;
    mac.update(payload);
    mac.verify_slice(&claimed)
        .map_err(|_| GatewayError::SignatureMismatch)
}

/// Compute the `sha256=<hex>` signature for a payload. Used by tests
/// and outbound integrations.
#[must_use]
pub fn sign(secret: &[u8], payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    use berth_control::collaborators::{
        Builder, MockBuilder, MockRouteProjector, MockRuntime, RouteProjector, Runtime,
    };
    use berth_core::{
        DeploymentFilter, DeploymentStore, MemoryStore, Project,
    };

    const SECRET: &[u8] = b"shhh-secret";

    #[test]
    fn valid_signature_is_accepted() {
        let payload = br#"{"ref":"refs/heads/main"}"#;
        let header = sign(SECRET, payload);

        assert!(verify_signature(SECRET, payload, Some(&header)).is_ok());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let payload = br#"{"ref":"refs/heads/main"}"#;
        let header = sign(b"other-secret", payload);

        assert!(matches!(
            verify_signature(SECRET, payload, Some(&header)),
            Err(GatewayError::SignatureMismatch)
        ));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let header = sign(SECRET, br#"{"ref":"refs/heads/main"}"#);

        assert!(matches!(
            verify_signature(SECRET, br#"{"ref":"refs/heads/evil"}"#, Some(&header)),
            Err(GatewayError::SignatureMismatch)
        ));
    }

    #[test]
    fn missing_or_malformed_header_is_rejected() {
        let payload = b"{}";

        assert!(verify_signature(SECRET, payload, None).is_err());
        assert!(verify_signature(SECRET, payload, Some("sha1=abcd")).is_err());
        assert!(verify_signature(SECRET, payload, Some("sha256=zznothex")).is_err());
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        handler: WebhookHandler,
        project_id: ProjectId,
    }

    fn fixture(policy: TargetPolicy, secret: Option<&str>) -> Fixture {
        let store = Arc::new(MemoryStore::new());

        let project = Project {
            id: ProjectId::new("proj-1"),
            name: "demo".to_owned(),
            repo_url: "https://example.com/demo.git".to_owned(),
            default_branch: "main".to_owned(),
            webhook_secret: secret.map(str::to_owned),
        };
        store.put_project(project.clone());
        store.put_environment(Environment::new(project.id.clone(), "production"));
        store.put_environment(Environment::new(project.id.clone(), "staging"));

        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&store) as Arc<dyn DeploymentStore>,
            Arc::clone(&store) as Arc<dyn ProjectStore>,
            Arc::clone(&store) as Arc<dyn EnvironmentStore>,
            Arc::new(MockBuilder::default()) as Arc<dyn Builder>,
            Arc::new(MockRuntime::default()) as Arc<dyn Runtime>,
            Arc::new(MockRouteProjector::default()) as Arc<dyn RouteProjector>,
        ));

        let handler = WebhookHandler::new(
            Arc::clone(&store) as Arc<dyn ProjectStore>,
            Arc::clone(&store) as Arc<dyn EnvironmentStore>,
            orchestrator,
            policy,
        );

        Fixture {
            store,
            handler,
            project_id: project.id,
        }
    }

    fn push_body() -> Vec<u8> {
        serde_json::json!({
            "ref": "refs/heads/main",
            "after": "aaaabbbbccccddddeeeeffff0000111122223333",
            "head_commit": {
                "id": "aaaabbbbccccddddeeeeffff0000111122223333",
                "message": "fix login redirect"
            }
        })
        .to_string()
        .into_bytes()
    }

    #[tokio::test]
    async fn push_creates_a_pending_deployment() {
        let fx = fixture(TargetPolicy::FirstByName, Some("shhh-secret"));
        let body = push_body();
        let header = sign(SECRET, &body);

        let outcome = fx
            .handler
            .handle(&fx.project_id, "push", Some(&header), &body)
            .await
            .expect("handle");

        let WebhookOutcome::Deployed { deployment_id } = outcome else {
            panic!("expected a deployment");
        };

        let record = fx
            .store
            .get(&deployment_id)
            .await
            .expect("get")
            .expect("record");
        assert_eq!(
            record.revision.as_deref(),
            Some("aaaabbbbccccddddeeeeffff0000111122223333")
        );
        assert_eq!(record.revision_message.as_deref(), Some("fix login redirect"));
        // FirstByName picks "production" over "staging".
        let env = fx
            .store
            .environment(&record.environment_id)
            .await
            .expect("get env")
            .expect("env");
        assert_eq!(env.name, "production");
    }

    #[tokio::test]
    async fn invalid_signature_creates_no_record() {
        let fx = fixture(TargetPolicy::FirstByName, Some("shhh-secret"));
        let body = push_body();
        let header = sign(b"wrong-secret", &body);

        let result = fx
            .handler
            .handle(&fx.project_id, "push", Some(&header), &body)
            .await;
        assert!(matches!(result, Err(GatewayError::SignatureMismatch)));

        let listed = fx.store.list(&DeploymentFilter::new()).await.expect("list");
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn missing_secret_is_rejected_even_with_header() {
        let fx = fixture(TargetPolicy::FirstByName, None);
        let body = push_body();
        let header = sign(SECRET, &body);

        let result = fx
            .handler
            .handle(&fx.project_id, "push", Some(&header), &body)
            .await;
        assert!(matches!(result, Err(GatewayError::SecretNotConfigured(_))));
    }

    #[tokio::test]
    async fn ping_and_unknown_events_do_not_deploy() {
        let fx = fixture(TargetPolicy::FirstByName, Some("shhh-secret"));
        let body = b"{}".to_vec();
        let header = sign(SECRET, &body);

        let pong = fx
            .handler
            .handle(&fx.project_id, "ping", Some(&header), &body)
            .await
            .expect("ping");
        assert_eq!(pong, WebhookOutcome::Pong);

        let ignored = fx
            .handler
            .handle(&fx.project_id, "issues", Some(&header), &body)
            .await
            .expect("issues");
        assert_eq!(
            ignored,
            WebhookOutcome::Ignored {
                event: "issues".to_owned()
            }
        );

        let listed = fx.store.list(&DeploymentFilter::new()).await.expect("list");
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn named_policy_targets_that_environment() {
        let fx = fixture(
            TargetPolicy::Named("staging".to_owned()),
            Some("shhh-secret"),
        );
        let body = push_body();
        let header = sign(SECRET, &body);

        let outcome = fx
            .handler
            .handle(&fx.project_id, "push", Some(&header), &body)
            .await
            .expect("handle");

        let WebhookOutcome::Deployed { deployment_id } = outcome else {
            panic!("expected a deployment");
        };
        let record = fx
            .store
            .get(&deployment_id)
            .await
            .expect("get")
            .expect("record");
        let env = fx
            .store
            .environment(&record.environment_id)
            .await
            .expect("get env")
            .expect("env");
        assert_eq!(env.name, "staging");
    }

    #[tokio::test]
    async fn tag_push_is_a_payload_error() {
        let fx = fixture(TargetPolicy::FirstByName, Some("shhh-secret"));
        let body = serde_json::json!({
            "ref": "refs/tags/v1.0.0",
            "after": "aaaabbbbccccddddeeeeffff0000111122223333"
        })
        .to_string()
        .into_bytes();
        let header = sign(SECRET, &body);

        let result = fx
            .handler
            .handle(&fx.project_id, "push", Some(&header), &body)
            .await;
        assert!(matches!(result, Err(GatewayError::Payload(_))));
    }
}
