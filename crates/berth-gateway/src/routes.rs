//! Route table projection.
//!
//! The route table is not pipeline state: it is a projection over the
//! durable set of successful deployments, recomputed in full on every
//! apply. That makes it independently retryable after a failed proxy
//! reload without touching any deployment record.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use berth_control::{ControlError, ControlResult, RouteProjector};
use berth_core::{DeploymentFilter, DeploymentStatus, DeploymentStore, EnvironmentStore};

use crate::error::{GatewayError, GatewayResult};

/// Configuration for the route table configurator.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteTableConfig {
    /// Where the rendered proxy config is written.
    #[serde(default = "default_config_path")]
    pub config_path: PathBuf,

    /// Command run after writing the config. Empty disables the reload.
    #[serde(default = "default_reload_command")]
    pub reload_command: Vec<String>,
}

impl Default for RouteTableConfig {
    fn default() -> Self {
        Self {
            config_path: default_config_path(),
            reload_command: default_reload_command(),
        }
    }
}

fn default_config_path() -> PathBuf {
    PathBuf::from("/etc/nginx/conf.d/berth.conf")
}

fn default_reload_command() -> Vec<String> {
    vec!["nginx".to_owned(), "-s".to_owned(), "reload".to_owned()]
}

/// One rendered route: a public hostname mapped to a host port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    /// Public hostname.
    pub domain: String,
    /// Host port of the container serving the hostname.
    pub host_port: u16,
}

/// Recomputes the domain → port mapping and applies it to the proxy.
pub struct RouteConfigurator {
    deployments: Arc<dyn DeploymentStore>,
    environments: Arc<dyn EnvironmentStore>,
    config: RouteTableConfig,
}

impl RouteConfigurator {
    /// Create a configurator over the deployment projection sources.
    pub fn new(
        deployments: Arc<dyn DeploymentStore>,
        environments: Arc<dyn EnvironmentStore>,
        config: RouteTableConfig,
    ) -> Self {
        Self {
            deployments,
            environments,
            config,
        }
    }

    /// Recompute the route table, write the proxy config, and reload.
    #[instrument(skip(self))]
    pub async fn apply(&self) -> GatewayResult<()> {
        let entries = self.project_routes().await?;
        let rendered = render_config(&entries);

        tokio::fs::write(&self.config_path(), rendered).await?;
        debug!(
            path = %self.config_path().display(),
            routes = entries.len(),
            "proxy config written"
        );

        self.reload_proxy().await?;
        info!(routes = entries.len(), "route table applied");
        Ok(())
    }

    fn config_path(&self) -> &PathBuf {
        &self.config.config_path
    }

    /// Latest successful deployment per environment, mapped to its
    /// environment's domain.
    async fn project_routes(&self) -> GatewayResult<Vec<RouteEntry>> {
        let successes = self
            .deployments
            .list(&DeploymentFilter::new().with_status(DeploymentStatus::Success))
            .await
            .map_err(|e| GatewayError::Control(e.into()))?;

        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        // list() is newest first, so the first hit per environment wins.
        for record in successes {
            if !seen.insert(record.environment_id.clone()) {
                continue;
            }
            let Some(host_port) = record.host_port else {
                continue;
            };

            let environment = self
                .environments
                .environment(&record.environment_id)
                .await
                .map_err(|e| GatewayError::Control(e.into()))?;

            let Some(environment) = environment else {
                warn!(environment_id = %record.environment_id, "environment missing, skipping route");
                continue;
            };
            let Some(domain) = environment.domain else {
                continue;
            };

            entries.push(RouteEntry { domain, host_port });
        }

        entries.sort_by(|a, b| a.domain.cmp(&b.domain));
        Ok(entries)
    }

    async fn reload_proxy(&self) -> GatewayResult<()> {
        let Some((program, args)) = self.config.reload_command.split_first() else {
            return Ok(());
        };

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| GatewayError::Proxy(format!("failed to invoke {program}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GatewayError::Proxy(format!(
                "{program} exited with {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl RouteProjector for RouteConfigurator {
    async fn refresh(&self) -> ControlResult<()> {
        self.apply()
            .await
            .map_err(|e| ControlError::internal(e.to_string()))
    }
}

/// Render proxy server blocks for the route entries.
#[must_use]
pub fn render_config(entries: &[RouteEntry]) -> String {
    let mut out = String::from("# Managed by berth; do not edit.\n");

    for entry in entries {
        let _ = write!(
            out,
            "\nserver {{\n    listen 80;\n    server_name {};\n\n    location / {{\n        proxy_pass http://127.0.0.1:{};\n        proxy_set_header Host $host;\n        proxy_set_header X-Real-IP $remote_addr;\n        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;\n    }}\n}}\n",
            entry.domain, entry.host_port
        );
    }

    out
}
