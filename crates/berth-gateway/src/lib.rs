//! Webhook ingestion and front-door route configuration for Berth.
//!
//! Two responsibilities share this crate: authenticating inbound push
//! notifications and turning them into deployments, and projecting the
//! set of successful deployments into the front-door proxy's route
//! table.

pub mod api;
pub mod error;
pub mod routes;
pub mod webhook;

pub use api::{router, AppState};
pub use error::{GatewayError, GatewayResult};
pub use routes::{render_config, RouteConfigurator, RouteEntry, RouteTableConfig};
pub use webhook::{sign, verify_signature, TargetPolicy, WebhookHandler, WebhookOutcome};
