//! Unified server configuration.
//!
//! One TOML file configures every service hosted by the binary, with
//! `BERTH_`-prefixed environment variables overriding individual keys
//! (`BERTH_SERVER__LISTEN`, `BERTH_RUNTIME__MEMORY_LIMIT_MB`, ...).
//! Projects and their environments are seeded from the `[[projects]]`
//! tables into the in-memory store at startup.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;
use thiserror::Error;

use berth_core::{Environment, Project, ProjectId};
use berth_gateway::{RouteTableConfig, TargetPolicy};
use berth_runtime::RuntimeConfig;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to parse configuration.
    #[error("configuration error: {0}")]
    Parse(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Unified server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerSettings,

    /// Image builder settings.
    #[serde(default)]
    pub build: BuildSettings,

    /// Container runtime settings.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Webhook ingestion settings.
    #[serde(default)]
    pub webhook: WebhookSettings,

    /// Route table settings.
    #[serde(default)]
    pub routes: RouteSettings,

    /// Projects seeded into the store at startup.
    #[serde(default)]
    pub projects: Vec<ProjectSeed>,
}

impl ServerConfig {
    /// Load configuration from file and environment.
    ///
    /// Sources, later overriding earlier: defaults, `berth.toml` in the
    /// current directory, the explicit config file if given, then
    /// `BERTH_`-prefixed environment variables.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Toml::file("berth.toml"));

        if let Some(p) = path {
            figment = figment.merge(Toml::file(p));
        }

        figment
            .merge(Env::prefixed("BERTH_").split("__"))
            .extract()
            .map_err(ConfigError::from)
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Address the combined API and webhook listener binds to.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 7600)
}

/// Image builder settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildSettings {
    /// Directory for per-build working trees.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Directory for bare repository caches.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Explicit docker binary path. Discovered from PATH when unset.
    #[serde(default)]
    pub docker_binary: Option<PathBuf>,

    /// Age after which working trees left behind by interrupted builds
    /// are swept, in seconds.
    #[serde(default = "default_tree_max_age_secs")]
    pub tree_max_age_secs: u64,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            cache_dir: default_cache_dir(),
            docker_binary: None,
            tree_max_age_secs: default_tree_max_age_secs(),
        }
    }
}

const fn default_tree_max_age_secs() -> u64 {
    3600
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("/var/lib/berth/builds")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("/var/lib/berth/cache")
}

/// Webhook ingestion settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookSettings {
    /// How the target environment is chosen for a push.
    #[serde(default)]
    pub target: TargetPolicy,
}

/// Route table settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteSettings {
    /// Whether successful deployments are projected to the proxy.
    #[serde(default = "default_routes_enabled")]
    pub enabled: bool,

    /// Config path and reload command for the proxy.
    #[serde(flatten)]
    pub table: RouteTableConfig,
}

impl Default for RouteSettings {
    fn default() -> Self {
        Self {
            enabled: default_routes_enabled(),
            table: RouteTableConfig::default(),
        }
    }
}

const fn default_routes_enabled() -> bool {
    true
}

/// A project declared in the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectSeed {
    /// Stable project identifier, used in webhook and API paths.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Git repository URL.
    pub repo_url: String,
    /// Branch deployed when a push names no revision.
    #[serde(default = "default_branch")]
    pub default_branch: String,
    /// Shared secret for webhook signatures.
    #[serde(default)]
    pub webhook_secret: Option<String>,
    /// Environments belonging to the project.
    #[serde(default)]
    pub environments: Vec<EnvironmentSeed>,
}

fn default_branch() -> String {
    "main".to_owned()
}

/// An environment declared under a project.
#[derive(Debug, Clone, Deserialize)]
pub struct EnvironmentSeed {
    /// Environment name.
    pub name: String,
    /// Public hostname routed to the environment's container.
    #[serde(default)]
    pub domain: Option<String>,
    /// Variables injected into the container.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

impl ProjectSeed {
    /// Materialise the seed into store records.
    #[must_use]
    pub fn into_records(self) -> (Project, Vec<Environment>) {
        let project_id = ProjectId::new(self.id.as_str());

        let environments = self
            .environments
            .into_iter()
            .map(|seed| {
                let mut environment = Environment::new(project_id.clone(), seed.name);
                if let Some(domain) = seed.domain {
                    environment = environment.with_domain(domain);
                }
                for (name, value) in seed.variables {
                    environment = environment.with_variable(name, value);
                }
                environment
            })
            .collect();

        let project = Project {
            id: project_id,
            name: self.name,
            repo_url: self.repo_url,
            default_branch: self.default_branch,
            webhook_secret: self.webhook_secret,
        };

        (project, environments)
    }
}
