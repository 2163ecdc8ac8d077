//! Berth unified server binary.
//!
//! Runs the deployment API, webhook ingester, and route configurator in
//! a single process against one in-memory store.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use berth_build::{ImageBuilder, SourceManager};
use berth_control::collaborators::{Builder, NoopRouteProjector, RouteProjector, Runtime};
use berth_control::Orchestrator;
use berth_core::{DeploymentStore, EnvironmentStore, MemoryStore, ProjectStore};
use berth_gateway::{RouteConfigurator, WebhookHandler};
use berth_runtime::{ContainerRuntime, DockerCli};

use config::ServerConfig;

/// Berth unified server.
#[derive(Parser, Debug)]
#[command(name = "berth-server")]
#[command(about = "Run all Berth services in a single process")]
#[command(version)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug,hyper=info,tower=info"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    info!("Berth server starting");

    let config = ServerConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        info!(error = %e, "failed to load config, using defaults");
        ServerConfig::default()
    });

    info!(
        listen = %config.server.listen,
        work_dir = %config.build.work_dir.display(),
        projects = config.projects.len(),
        "configuration loaded"
    );

    tokio::fs::create_dir_all(&config.build.work_dir).await?;
    tokio::fs::create_dir_all(&config.build.cache_dir).await?;

    let store = Arc::new(MemoryStore::new());
    seed_store(&store, &config);

    let docker = match &config.build.docker_binary {
        Some(path) => DockerCli::with_binary(path),
        None => DockerCli::discover()?,
    };
    if let Err(e) = docker.preflight().await {
        warn!(error = %e, "docker daemon preflight failed, deployments will error until it recovers");
    }

    let sources = SourceManager::new(&config.build.work_dir, &config.build.cache_dir);
    let builder = ImageBuilder::new(sources, docker.clone());
    let runtime = ContainerRuntime::with_cli(docker, config.runtime.clone());

    spawn_tree_sweeper(&config);

    let routes: Arc<dyn RouteProjector> = if config.routes.enabled {
        Arc::new(RouteConfigurator::new(
            Arc::clone(&store) as Arc<dyn DeploymentStore>,
            Arc::clone(&store) as Arc<dyn EnvironmentStore>,
            config.routes.table.clone(),
        ))
    } else {
        info!("route projection disabled");
        Arc::new(NoopRouteProjector)
    };

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&store) as Arc<dyn DeploymentStore>,
        Arc::clone(&store) as Arc<dyn ProjectStore>,
        Arc::clone(&store) as Arc<dyn EnvironmentStore>,
        Arc::new(builder) as Arc<dyn Builder>,
        Arc::new(runtime) as Arc<dyn Runtime>,
        routes,
    ));

    let webhook_handler = Arc::new(WebhookHandler::new(
        Arc::clone(&store) as Arc<dyn ProjectStore>,
        Arc::clone(&store) as Arc<dyn EnvironmentStore>,
        Arc::clone(&orchestrator),
        config.webhook.target.clone(),
    ));

    let app = berth_control::api::router(berth_control::api::AppState {
        orchestrator: Arc::clone(&orchestrator),
    })
    .merge(berth_gateway::router(berth_gateway::AppState {
        handler: webhook_handler,
    }));

    let listener = tokio::net::TcpListener::bind(config.server.listen).await?;
    info!(listen = %config.server.listen, "berth server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Berth server shutdown complete");
    Ok(())
}

/// Periodically sweep working trees left behind by interrupted builds.
///
/// The first tick fires immediately, so a crash-restart cleans up
/// straight away.
fn spawn_tree_sweeper(config: &ServerConfig) {
    let sweeper = SourceManager::new(&config.build.work_dir, &config.build.cache_dir);
    // interval() panics on a zero period.
    let max_age = Duration::from_secs(config.build.tree_max_age_secs.max(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(max_age);
        loop {
            ticker.tick().await;
            match sweeper.cleanup(max_age).await {
                Ok(0) => {}
                Ok(swept) => info!(swept, "stale working trees removed"),
                Err(e) => warn!(error = %e, "stale tree sweep failed"),
            }
        }
    });
}

/// Load configured projects and environments into the store.
fn seed_store(store: &MemoryStore, config: &ServerConfig) {
    for seed in config.projects.iter().cloned() {
        let (project, environments) = seed.into_records();
        info!(
            project = %project.id,
            environments = environments.len(),
            "project seeded"
        );
        store.put_project(project);
        for environment in environments {
            store.put_environment(environment);
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            info!("received SIGTERM, initiating shutdown");
        }
    }
}
