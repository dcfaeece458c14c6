//! Shares Controller - CPU share controller for co-located workloads
//!
//! Runs on each node, protecting the SLO of one latency-critical service
//! by growing, shrinking or evicting best-effort containers.

use anyhow::{Context, Result};
use clap::Parser;
use controller_lib::{
    control::{resolve_context, ControlLoopBuilder},
    health::{components, HealthRegistry},
    observability::StructuredLogger,
    orchestrator::{KubeOrchestrator, Orchestrator},
    runtime::{ContainerRuntime, DockerRuntime},
    ControllerConfig, ControllerError,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;

const CONTROLLER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// CPU shares controller
#[derive(Parser)]
#[command(name = "shares-controller")]
#[command(author, version, about = "Adjusts best-effort CPU shares against an SLO", long_about = None)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, short, default_value = "config.json")]
    config: PathBuf,

    /// Log per-cycle statistics
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(fmt::layer().json())
        .init();

    let config = ControllerConfig::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    info!(path = %cli.config.display(), mode = config.mode.as_str(), "Controller configured");

    let runtime = DockerRuntime::connect()
        .map_err(|e| ControllerError::RuntimeUnavailable(format!("{:#}", e)))?;
    runtime
        .ping()
        .await
        .map_err(|e| ControllerError::RuntimeUnavailable(format!("{:#}", e)))?;
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(runtime);

    let orchestrator: Option<Arc<dyn Orchestrator>> = if config.mode.is_orchestrated() {
        let orchestrator = KubeOrchestrator::connect()
            .await
            .map_err(|e| ControllerError::OrchestratorUnavailable(format!("{:#}", e)))?;
        Some(Arc::new(orchestrator) as Arc<dyn Orchestrator>)
    } else {
        None
    };

    let node_name = std::env::var(&config.node_name_env).ok();
    let context = resolve_context(&config, orchestrator.as_deref(), node_name).await?;

    let health_registry = HealthRegistry::new();
    health_registry.register(components::RUNTIME).await;
    health_registry.register(components::SLO_ORACLE).await;
    health_registry.register(components::TELEMETRY).await;
    if orchestrator.is_some() {
        health_registry.register(components::ORCHESTRATOR).await;
    }

    let logger = StructuredLogger::new(context.node_name.clone(), cli.verbose);
    logger.log_startup(CONTROLLER_VERSION, config.mode.as_str(), config.period);

    let metrics_port = config.metrics_port;
    let mut builder = ControlLoopBuilder::new(config, context)
        .runtime(runtime)
        .health(health_registry.clone())
        .verbose(cli.verbose);
    if let Some(orchestrator) = orchestrator {
        builder = builder.orchestrator(orchestrator);
    }
    let control = builder.build()?;

    if !control.enable_admission().await {
        warn!("Could not enable best-effort admission at startup");
    }

    if let Some(port) = metrics_port {
        let app_state = Arc::new(api::AppState::new(health_registry.clone()));
        tokio::spawn(async move {
            if let Err(e) = api::serve(port, app_state).await {
                warn!(error = %format!("{:#}", e), "Health and metrics server stopped");
            }
        });
    }

    health_registry.set_ready(true).await;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("SIGINT received");
        let _ = shutdown_tx.send(());
    });

    control.run(shutdown_rx).await?;
    info!("Shutting down");

    Ok(())
}
