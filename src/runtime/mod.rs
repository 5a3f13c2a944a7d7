/// Runtime Orchestration Layer
///
/// This module turns persisted pipelines into scheduled, tracked runs. It handles:
/// - Named cron timers with add-or-replace semantics
/// - Classifying firings against the pipeline's current triggers
/// - Tracking in-flight executors per pipeline
/// - Recording run history and status with an error fallback
/// - Orchestrating the whole lifecycle from startup reload to run cleanup

// Named recurring and one-shot timers on tokio-cron-scheduler
pub mod cron;

// Maps a firing to manual / timer / stale
pub mod trigger;

// Lock-free map of running executors
pub mod tracker;

// Run history persistence
pub mod recorder;

// Credential, storage and email collaborators
pub mod providers;

// Executor contract and the built-in sequential executor
pub mod executor;

// Top-level lifecycle owner
pub mod orchestrator;

// Re-export main types
pub use cron::CronRegistry;
pub use executor::{ExecutorContext, ExecutorFactory, PipelineExecutor, SequentialExecutorFactory};
pub use orchestrator::{PipelineOrchestrator, RunOutcome};
pub use providers::Collaborators;
pub use recorder::{HistoryReporter, RunHistoryRecorder};
pub use tracker::ExecutionTracker;
pub use trigger::{TriggerClass, TriggerResolver};
