//! Container runtime for Berth deployments.
//!
//! Drives the docker CLI to run one container per (project,
//! environment) pair under a deterministic name, with host ports
//! handed out by an explicit allocator and resource limits applied
//! uniformly. Stop is idempotent and health probing never raises.

pub mod cli;
pub mod error;
pub mod ports;
pub mod runtime;

pub use cli::{CliOutput, ContainerCli, DockerCli, MockCli};
pub use error::{RuntimeError, RuntimeResult};
pub use ports::PortAllocator;
pub use runtime::{
    container_name, container_port, ContainerHealth, ContainerRuntime, HealthStatus,
    RunningContainer, RuntimeConfig,
};
