/// Pipeline Data Layer
///
/// This module handles pipeline documents and their persisted projections:
/// - Type definitions (PipelineDocument, Trigger, PipelineEntity, RunHistory)
/// - Repository abstraction with a SQLite implementation via sqlx

// Core pipeline type definitions
pub mod types;

// SQLite persistence for pipelines, histories and history logs
pub mod storage;

// Re-export commonly used types
pub use storage::{PipelineRepository, SqliteRepository};
pub use types::{
    HistoryEntity, HistoryLogEntity, LogEntry, PipelineDocument, PipelineEntity, PipelineSnapshot,
    RunHistory, Stage, Step, Trigger, TriggerKind,
};
