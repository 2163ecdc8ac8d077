//! Cancellation token registry.
//!
//! One token per live deployment: registered when the record is
//! created, removed on the terminal transition. The pipeline checks
//! its token between steps only; a step already in flight runs to
//! completion.

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use berth_core::DeploymentId;

/// Registry of cancellation tokens for live pipelines.
#[derive(Debug, Default)]
pub struct PipelineRegistry {
    tokens: DashMap<DeploymentId, CancellationToken>,
}

impl PipelineRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh token for a deployment.
    pub fn register(&self, id: &DeploymentId) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.insert(id.clone(), token.clone());
        token
    }

    /// Fire the token for a deployment. Returns whether one was
    /// registered.
    pub fn cancel(&self, id: &DeploymentId) -> bool {
        match self.tokens.get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop the token once the deployment is terminal.
    pub fn remove(&self, id: &DeploymentId) {
        self.tokens.remove(id);
    }

    /// Number of live tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether no pipeline is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_fires_registered_token() {
        let registry = PipelineRegistry::new();
        let id = DeploymentId::new("dep-1");

        let token = registry.register(&id);
        assert!(!token.is_cancelled());

        assert!(registry.cancel(&id));
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_unknown_deployment_is_false() {
        let registry = PipelineRegistry::new();
        assert!(!registry.cancel(&DeploymentId::new("ghost")));
    }

    #[test]
    fn remove_clears_the_entry() {
        let registry = PipelineRegistry::new();
        let id = DeploymentId::new("dep-1");

        registry.register(&id);
        assert_eq!(registry.len(), 1);

        registry.remove(&id);
        assert!(registry.is_empty());
        assert!(!registry.cancel(&id));
    }
}
