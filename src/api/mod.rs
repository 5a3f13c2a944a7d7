/// HTTP API Layer
///
/// This module provides the REST API endpoints for pipeline management
/// and run triggering. It handles:
/// - Pipeline detail, save and delete
/// - Manual and per-trigger fires
/// - Run history and in-flight execution listing

// Pipeline management endpoints
pub mod pipelines;

// Re-export router builder
pub use pipelines::{create_pipeline_routes, AppState};
