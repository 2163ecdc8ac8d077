//! Error types for the gateway.

use berth_control::ControlError;

/// Result type alias using [`GatewayError`].
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors that can occur while ingesting webhooks or reconfiguring
/// the proxy.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The signature header is missing, malformed, or does not match
    /// the payload.
    #[error("webhook signature verification failed")]
    SignatureMismatch,

    /// The project has no webhook secret configured.
    #[error("no webhook secret configured for project {0}")]
    SecretNotConfigured(String),

    /// No project with the given ID.
    #[error("project not found: {0}")]
    ProjectNotFound(String),

    /// The project has no deployable environment.
    #[error("no deployable environment for project {0}")]
    NoEnvironment(String),

    /// The payload could not be parsed.
    #[error("invalid webhook payload: {0}")]
    Payload(String),

    /// Deployment creation failed.
    #[error(transparent)]
    Control(#[from] ControlError),

    /// Proxy configuration or reload failed.
    #[error("proxy reconfiguration failed: {0}")]
    Proxy(String),

    /// Filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
