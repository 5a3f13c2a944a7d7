/// Pipewright: pipeline trigger scheduling and execution orchestration
///
/// This library keeps a live cron schedule in line with persisted pipeline
/// triggers, maps every firing to exactly one executor run, tracks runs in flight
/// and records their outcome and logs.

// Core configuration and setup
pub mod config;

// Pipeline documents, persisted entities and the repository abstraction
pub mod pipeline;

// Cron registry, trigger resolution, execution tracking, history recording, orchestration
pub mod runtime;

// HTTP API layer - REST endpoints for pipeline management and run triggering
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use pipeline::{PipelineDocument, PipelineEntity, PipelineRepository, SqliteRepository};
pub use runtime::{CronRegistry, ExecutionTracker, PipelineOrchestrator, RunOutcome};
pub use server::start_server;
