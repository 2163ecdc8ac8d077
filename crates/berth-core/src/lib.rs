//! Shared data model for the Berth deployment platform.
//!
//! This crate defines the vocabulary the services speak to each other:
//! identifier newtypes, the deployment record and its status machine,
//! per-deployment log entries, the read-only project/environment
//! collaborator models, and the async storage traits with an in-memory
//! implementation used by the services and their tests.

pub mod deployment;
pub mod memory;
pub mod project;
pub mod store;
pub mod types;

pub use deployment::{
    DeploymentLogEntry, DeploymentRecord, DeploymentStatus, LogLevel, StatusUpdate,
};
pub use memory::MemoryStore;
pub use project::{EnvVar, Environment, Project};
pub use store::{
    DeploymentFilter, DeploymentStore, EnvironmentStore, ProjectStore, StoreError, StoreResult,
};
pub use types::{ContainerRef, DeploymentId, EnvironmentId, Framework, ImageHandle, ProjectId};
