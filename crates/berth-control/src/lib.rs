//! Deployment orchestration for Berth.
//!
//! Owns the deployment state machine: records are created `pending`,
//! driven through build and run by a spawned pipeline task, and end in
//! exactly one terminal status. Pipelines are serialized per
//! (project, environment) and cancellable between steps.

pub mod api;
pub mod collaborators;
pub mod error;
pub mod gate;
pub mod orchestrator;
pub mod registry;

pub use collaborators::{Builder, NoopRouteProjector, RouteProjector, Runtime};
pub use error::{ControlError, ControlResult};
pub use gate::{DeployGate, GatePermit};
pub use orchestrator::{DeployRequest, LogPage, LogQuery, Orchestrator};
pub use registry::PipelineRegistry;
