/// Pipewright: pipeline trigger scheduling and execution orchestration
///
/// Main entry point for the pipewright server. Loads configuration, reloads the
/// triggers of every enabled pipeline and serves the management API.

use pipewright::{config::Config, server::start_server};

/// Application entry point
///
/// The server provides:
/// - Pipeline management API at /api/pipelines/*
/// - In-flight executions at /api/executions
/// - Health check at /healthz
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration (defaults to 0.0.0.0:3004 and data/pipewright.db)
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
