/// Server setup and initialization
///
/// Wires together storage, cron registry, execution tracker, orchestrator and HTTP
/// routes. Provides the main application factory function for creating the Axum app.

use crate::{
    api::{create_pipeline_routes, AppState},
    config::Config,
    pipeline::SqliteRepository,
    runtime::{Collaborators, CronRegistry, ExecutionTracker, PipelineOrchestrator, SequentialExecutorFactory},
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Create the main Axum application with all routes
///
/// Opens the database, reloads every enabled pipeline's triggers into a fresh
/// cron registry and starts it before serving requests.
pub async fn create_app(config: Config) -> Result<Router> {
    tracing::info!("📁 Ensuring data directory exists: {}", config.database.data_dir);
    std::fs::create_dir_all(&config.database.data_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create data directory: {}", e))?;

    tracing::info!("📋 Initializing pipeline storage");
    let repository = Arc::new(SqliteRepository::open(&config.database.db_path()).await?);

    tracing::info!("⏰ Initializing cron registry");
    let cron = Arc::new(
        CronRegistry::new()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to initialize cron registry: {}", e))?,
    );

    tracing::info!("🚀 Initializing pipeline orchestrator");
    let orchestrator = PipelineOrchestrator::new(
        repository,
        Arc::clone(&cron),
        Arc::new(ExecutionTracker::new()),
        Arc::new(SequentialExecutorFactory::new()),
        Collaborators::local(&config.scheduler.file_root_dir),
        &config.scheduler,
    );

    tracing::info!("📥 Reloading triggers of enabled pipelines");
    orchestrator
        .reload_triggers()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to reload pipeline triggers: {}", e))?;

    cron.start().await?;

    let app_state = AppState { orchestrator };

    tracing::info!("📡 Creating HTTP router with all endpoints");
    let app = Router::new()
        .route("/healthz", get(health_check))
        .merge(create_pipeline_routes().with_state(app_state));

    tracing::info!("✅ Application initialized successfully");

    Ok(app)
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting pipewright server...");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
