//! Per-(project, environment) pipeline serialization.
//!
//! The container name and host port for a pair are shared mutable
//! state, so at most one pipeline may run per pair. A second trigger
//! while one is in flight is rejected with a conflict, never queued
//! and never raced.

use std::sync::Arc;

use dashmap::DashMap;

use berth_core::{EnvironmentId, ProjectId};

use crate::error::{ControlError, ControlResult};

type GateKey = (ProjectId, EnvironmentId);

/// Keyed gate over in-flight pipelines.
#[derive(Debug, Clone, Default)]
pub struct DeployGate {
    in_flight: Arc<DashMap<GateKey, ()>>,
}

impl DeployGate {
    /// Create an empty gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the pair for a pipeline.
    ///
    /// Returns a permit that frees the pair on drop, or
    /// [`ControlError::DeploymentInFlight`] when already claimed.
    pub fn acquire(
        &self,
        project_id: &ProjectId,
        environment_id: &EnvironmentId,
    ) -> ControlResult<GatePermit> {
        let key = (project_id.clone(), environment_id.clone());

        // entry() holds the shard lock, making check-and-claim atomic.
        match self.in_flight.entry(key.clone()) {
            dashmap::Entry::Occupied(_) => Err(ControlError::DeploymentInFlight {
                project: project_id.to_string(),
                environment: environment_id.to_string(),
            }),
            dashmap::Entry::Vacant(entry) => {
                entry.insert(());
                Ok(GatePermit {
                    in_flight: Arc::clone(&self.in_flight),
                    key,
                })
            }
        }
    }

    /// Whether a pipeline is currently in flight for the pair.
    #[must_use]
    pub fn is_in_flight(&self, project_id: &ProjectId, environment_id: &EnvironmentId) -> bool {
        self.in_flight
            .contains_key(&(project_id.clone(), environment_id.clone()))
    }
}

/// Exclusive claim on a (project, environment) pair.
#[derive(Debug)]
pub struct GatePermit {
    in_flight: Arc<DashMap<GateKey, ()>>,
    key: GateKey,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_rejected() {
        let gate = DeployGate::new();
        let project = ProjectId::new("p1");
        let environment = EnvironmentId::new("e1");

        let permit = gate.acquire(&project, &environment).expect("first");
        assert!(matches!(
            gate.acquire(&project, &environment),
            Err(ControlError::DeploymentInFlight { .. })
        ));

        drop(permit);
        gate.acquire(&project, &environment).expect("after release");
    }

    #[test]
    fn pairs_are_independent() {
        let gate = DeployGate::new();
        let project = ProjectId::new("p1");

        let _a = gate
            .acquire(&project, &EnvironmentId::new("staging"))
            .expect("staging");
        let _b = gate
            .acquire(&project, &EnvironmentId::new("production"))
            .expect("production");

        assert!(gate.is_in_flight(&project, &EnvironmentId::new("staging")));
        assert!(!gate.is_in_flight(&project, &EnvironmentId::new("qa")));
    }
}
