//! In-memory store for tests and single-node deployments.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::deployment::{
    DeploymentLogEntry, DeploymentRecord, DeploymentStatus, LogLevel, StatusUpdate,
};
use crate::project::{Environment, Project};
use crate::store::{
    DeploymentFilter, DeploymentStore, EnvironmentStore, ProjectStore, StoreError, StoreResult,
};
use crate::types::{DeploymentId, EnvironmentId, ProjectId};

/// In-memory store backing all three storage traits.
///
/// Data is lost when the process exits; the platform's CRUD layer owns
/// durable project/environment records in production.
#[derive(Debug, Default)]
pub struct MemoryStore {
    deployments: RwLock<HashMap<String, DeploymentRecord>>,
    logs: RwLock<HashMap<String, Vec<DeploymentLogEntry>>>,
    projects: RwLock<HashMap<String, Project>>,
    environments: RwLock<HashMap<String, Environment>>,
}

impl MemoryStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a project record.
    pub fn put_project(&self, project: Project) {
        self.projects
            .write()
            .expect("lock poisoned")
            .insert(project.id.as_str().to_owned(), project);
    }

    /// Seed an environment record.
    pub fn put_environment(&self, environment: Environment) {
        self.environments
            .write()
            .expect("lock poisoned")
            .insert(environment.id.as_str().to_owned(), environment);
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Internal("lock poisoned".to_owned())
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn insert(&self, record: &DeploymentRecord) -> StoreResult<()> {
        let mut deployments = self.deployments.write().map_err(poisoned)?;

        let key = record.id.as_str().to_owned();
        if deployments.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: "deployment",
                id: key,
            });
        }

        deployments.insert(key, record.clone());
        Ok(())
    }

    async fn get(&self, id: &DeploymentId) -> StoreResult<Option<DeploymentRecord>> {
        let deployments = self.deployments.read().map_err(poisoned)?;
        Ok(deployments.get(id.as_str()).cloned())
    }

    async fn update_status(
        &self,
        id: &DeploymentId,
        update: StatusUpdate,
    ) -> StoreResult<DeploymentRecord> {
        let mut deployments = self.deployments.write().map_err(poisoned)?;

        let record = deployments
            .get_mut(id.as_str())
            .ok_or_else(|| StoreError::deployment_not_found(id))?;

        let to = update.status();
        if !record.status.can_transition_to(to) {
            return Err(StoreError::InvalidTransition {
                from: record.status,
                to,
            });
        }

        update.apply_to(record);
        Ok(record.clone())
    }

    async fn list(&self, filter: &DeploymentFilter) -> StoreResult<Vec<DeploymentRecord>> {
        let deployments = self.deployments.read().map_err(poisoned)?;

        let mut results: Vec<_> = deployments
            .values()
            .filter(|r| {
                if let Some(ref project_id) = filter.project_id {
                    if &r.project_id != project_id {
                        return false;
                    }
                }
                if let Some(ref environment_id) = filter.environment_id {
                    if &r.environment_id != environment_id {
                        return false;
                    }
                }
                if let Some(status) = filter.status {
                    if r.status != status {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();

        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(results)
    }

    async fn latest_success_before(
        &self,
        project_id: &ProjectId,
        environment_id: &EnvironmentId,
        before: DateTime<Utc>,
    ) -> StoreResult<Option<DeploymentRecord>> {
        let deployments = self.deployments.read().map_err(poisoned)?;

        Ok(deployments
            .values()
            .filter(|r| {
                &r.project_id == project_id
                    && &r.environment_id == environment_id
                    && r.status == DeploymentStatus::Success
                    && r.created_at < before
            })
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn append_log(
        &self,
        id: &DeploymentId,
        level: LogLevel,
        message: &str,
    ) -> StoreResult<()> {
        {
            let deployments = self.deployments.read().map_err(poisoned)?;
            if !deployments.contains_key(id.as_str()) {
                return Err(StoreError::deployment_not_found(id));
            }
        }

        let mut logs = self.logs.write().map_err(poisoned)?;
        logs.entry(id.as_str().to_owned())
            .or_default()
            .push(DeploymentLogEntry::new(level, message));
        Ok(())
    }

    async fn logs(&self, id: &DeploymentId) -> StoreResult<Vec<DeploymentLogEntry>> {
        {
            let deployments = self.deployments.read().map_err(poisoned)?;
            if !deployments.contains_key(id.as_str()) {
                return Err(StoreError::deployment_not_found(id));
            }
        }

        let logs = self.logs.read().map_err(poisoned)?;
        Ok(logs.get(id.as_str()).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn project(&self, id: &ProjectId) -> StoreResult<Option<Project>> {
        let projects = self.projects.read().map_err(poisoned)?;
        Ok(projects.get(id.as_str()).cloned())
    }
}

#[async_trait]
impl EnvironmentStore for MemoryStore {
    async fn environment(&self, id: &EnvironmentId) -> StoreResult<Option<Environment>> {
        let environments = self.environments.read().map_err(poisoned)?;
        Ok(environments.get(id.as_str()).cloned())
    }

    async fn list_for_project(&self, project_id: &ProjectId) -> StoreResult<Vec<Environment>> {
        let environments = self.environments.read().map_err(poisoned)?;

        let mut results: Vec<_> = environments
            .values()
            .filter(|e| &e.project_id == project_id && !e.deleted)
            .cloned()
            .collect();

        results.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContainerRef;

    fn record() -> DeploymentRecord {
        DeploymentRecord::new(
            ProjectId::new("proj-1"),
            EnvironmentId::new("env-1"),
            Some("abc123def".to_owned()),
            None,
        )
    }

    fn success_update() -> StatusUpdate {
        StatusUpdate::Success {
            duration_secs: 10.0,
            container_ref: ContainerRef::new("c1"),
            host_port: 4101,
        }
    }

    #[tokio::test]
    async fn insert_and_get() {
        let store = MemoryStore::new();
        let rec = record();
        let id = rec.id.clone();

        store.insert(&rec).await.expect("insert");

        let found = store.get(&id).await.expect("get").expect("present");
        assert_eq!(found.status, DeploymentStatus::Pending);
        assert_eq!(found.revision.as_deref(), Some("abc123def"));
    }

    #[tokio::test]
    async fn duplicate_insert_fails() {
        let store = MemoryStore::new();
        let rec = record();

        store.insert(&rec).await.expect("first insert");
        assert!(matches!(
            store.insert(&rec).await,
            Err(StoreError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn happy_path_transitions() {
        let store = MemoryStore::new();
        let rec = record();
        let id = rec.id.clone();
        store.insert(&rec).await.expect("insert");

        let building = store
            .update_status(&id, StatusUpdate::Building)
            .await
            .expect("to building");
        assert_eq!(building.status, DeploymentStatus::Building);

        let success = store
            .update_status(&id, success_update())
            .await
            .expect("to success");
        assert_eq!(success.status, DeploymentStatus::Success);
        assert_eq!(success.host_port, Some(4101));
    }

    #[tokio::test]
    async fn skipping_building_is_rejected() {
        let store = MemoryStore::new();
        let rec = record();
        let id = rec.id.clone();
        store.insert(&rec).await.expect("insert");

        let result = store.update_status(&id, success_update()).await;
        assert!(matches!(
            result,
            Err(StoreError::InvalidTransition {
                from: DeploymentStatus::Pending,
                to: DeploymentStatus::Success,
            })
        ));
    }

    #[tokio::test]
    async fn terminal_records_are_immutable() {
        let store = MemoryStore::new();
        let rec = record();
        let id = rec.id.clone();
        store.insert(&rec).await.expect("insert");

        store
            .update_status(&id, StatusUpdate::Building)
            .await
            .expect("building");
        store
            .update_status(
                &id,
                StatusUpdate::Cancelled {
                    duration_secs: Some(1.0),
                },
            )
            .await
            .expect("cancelled");

        for update in [
            StatusUpdate::Building,
            success_update(),
            StatusUpdate::Failed {
                duration_secs: 1.0,
                error: "nope".to_owned(),
            },
        ] {
            assert!(matches!(
                store.update_status(&id, update).await,
                Err(StoreError::InvalidTransition { .. })
            ));
        }
    }

    #[tokio::test]
    async fn log_appends_allowed_after_terminal() {
        let store = MemoryStore::new();
        let rec = record();
        let id = rec.id.clone();
        store.insert(&rec).await.expect("insert");

        store
            .update_status(&id, StatusUpdate::Building)
            .await
            .expect("building");
        store
            .update_status(
                &id,
                StatusUpdate::Failed {
                    duration_secs: 2.0,
                    error: "boom".to_owned(),
                },
            )
            .await
            .expect("failed");

        store
            .append_log(&id, LogLevel::Error, "boom")
            .await
            .expect("log append on terminal record");

        let logs = store.logs(&id).await.expect("logs");
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].level, LogLevel::Error);
    }

    #[tokio::test]
    async fn logs_preserve_insertion_order() {
        let store = MemoryStore::new();
        let rec = record();
        let id = rec.id.clone();
        store.insert(&rec).await.expect("insert");

        for i in 0..5 {
            store
                .append_log(&id, LogLevel::Info, &format!("step {i}"))
                .await
                .expect("append");
        }

        let logs = store.logs(&id).await.expect("logs");
        let messages: Vec<_> = logs.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(
            messages,
            vec!["step 0", "step 1", "step 2", "step 3", "step 4"]
        );

        // Re-querying returns the same prefix plus new entries.
        store
            .append_log(&id, LogLevel::Info, "step 5")
            .await
            .expect("append");
        let again = store.logs(&id).await.expect("logs");
        assert_eq!(again.len(), 6);
        assert_eq!(again[4].message, "step 4");
    }

    #[tokio::test]
    async fn logs_for_unknown_deployment_fail() {
        let store = MemoryStore::new();
        let result = store.logs(&DeploymentId::new("missing")).await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn latest_success_before_picks_most_recent_earlier() {
        let store = MemoryStore::new();
        let project = ProjectId::new("p");
        let environment = EnvironmentId::new("e");

        let mut ids = Vec::new();
        for _ in 0..3 {
            let rec = DeploymentRecord::new(project.clone(), environment.clone(), None, None);
            ids.push(rec.id.clone());
            store.insert(&rec).await.expect("insert");
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        // First two succeed, third stays pending.
        for id in &ids[..2] {
            store
                .update_status(id, StatusUpdate::Building)
                .await
                .expect("building");
            store
                .update_status(id, success_update())
                .await
                .expect("success");
        }

        let current = store.get(&ids[2]).await.expect("get").expect("present");
        let previous = store
            .latest_success_before(&project, &environment, current.created_at)
            .await
            .expect("query")
            .expect("should find one");
        assert_eq!(previous.id, ids[1]);

        let first = store.get(&ids[0]).await.expect("get").expect("present");
        let none = store
            .latest_success_before(&project, &environment, first.created_at)
            .await
            .expect("query");
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn environments_sorted_by_name_excluding_deleted() {
        let store = MemoryStore::new();
        let project = ProjectId::new("p");

        let mut zeta = Environment::new(project.clone(), "zeta");
        zeta.deleted = false;
        let alpha = Environment::new(project.clone(), "alpha");
        let mut gone = Environment::new(project.clone(), "aaa-deleted");
        gone.deleted = true;

        store.put_environment(zeta);
        store.put_environment(alpha);
        store.put_environment(gone);

        let envs = store.list_for_project(&project).await.expect("list");
        let names: Vec<_> = envs.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
