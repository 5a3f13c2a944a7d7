/// Pipeline management REST API endpoints
///
/// Thin handlers over the orchestrator: detail, save (parse + persist + register),
/// delete (deregister + delete), manual and per-trigger fires, run history and
/// the set of currently running pipelines.

use crate::{
    pipeline::{HistoryEntity, PipelineDocument, PipelineEntity, PipelineRepository},
    runtime::PipelineOrchestrator,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    /// Orchestrator owning triggers and runs
    pub orchestrator: Arc<PipelineOrchestrator>,
}

/// Request body for saving a pipeline
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavePipelineRequest {
    /// Owner of the pipeline
    pub user_id: String,
    /// Serialized pipeline document
    pub content: String,
}

/// Create pipeline management routes
pub fn create_pipeline_routes() -> Router<AppState> {
    Router::new()
        .route("/api/pipelines", post(save_pipeline))
        .route("/api/pipelines/{id}", get(get_pipeline).delete(delete_pipeline))
        .route("/api/pipelines/{id}/run", post(run_pipeline))
        .route("/api/pipelines/{id}/triggers/{trigger_id}/run", post(run_trigger))
        .route("/api/pipelines/{id}/histories", get(list_histories))
        .route("/api/executions", get(list_executions))
}

/// Save a pipeline and (re)register its triggers
///
/// POST /api/pipelines
/// Body: { "userId": "...", "content": "{\"id\": ..., \"stages\": [...], \"triggers\": [...]}" }
async fn save_pipeline(
    State(state): State<AppState>,
    Json(payload): Json<SavePipelineRequest>,
) -> Result<Json<PipelineEntity>, StatusCode> {
    match PipelineDocument::parse(&payload.content) {
        Ok(document) if !document.id.is_empty() => {}
        Ok(_) => return Err(StatusCode::BAD_REQUEST),
        Err(e) => {
            tracing::warn!("Rejected pipeline document: {:#}", e);
            return Err(StatusCode::BAD_REQUEST);
        }
    }

    match state.orchestrator.save_pipeline(&payload.user_id, &payload.content).await {
        Ok(entity) => Ok(Json(entity)),
        Err(e) => {
            tracing::error!("Failed to save pipeline: {:#}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Get a pipeline by ID
///
/// GET /api/pipelines/{id}
async fn get_pipeline(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PipelineEntity>, StatusCode> {
    match state.orchestrator.get_pipeline(&id).await {
        Ok(Some(pipeline)) => Ok(Json(pipeline)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to get pipeline {}: {:#}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Delete a pipeline after removing its timers; history is kept
///
/// DELETE /api/pipelines/{id}
async fn delete_pipeline(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    match state.orchestrator.delete_pipeline(&id).await {
        Ok(true) => Ok(Json(json!({ "message": "Pipeline deleted successfully" }))),
        Ok(false) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to delete pipeline {}: {:#}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Fire a one-off manual run
///
/// POST /api/pipelines/{id}/run
async fn run_pipeline(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    ensure_exists(&state, &id).await?;

    if let Err(e) = state.orchestrator.fire_once(&id).await {
        tracing::error!("Failed to schedule manual run of pipeline {}: {:#}", id, e);
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    Ok((StatusCode::ACCEPTED, Json(json!({ "message": "Run scheduled" }))))
}

/// Fire a run as if the trigger's timer went off
///
/// POST /api/pipelines/{id}/triggers/{trigger_id}/run
async fn run_trigger(
    State(state): State<AppState>,
    Path((id, trigger_id)): Path<(String, String)>,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    ensure_exists(&state, &id).await?;

    let orchestrator = Arc::clone(&state.orchestrator);
    let pipeline_id = id.clone();
    tokio::spawn(async move {
        // run() logs its own failures
        let _ = orchestrator.run(&pipeline_id, Some(trigger_id.as_str())).await;
    });

    Ok((StatusCode::ACCEPTED, Json(json!({ "message": "Run started" }))))
}

/// List recorded runs, most recent first
///
/// GET /api/pipelines/{id}/histories
async fn list_histories(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<HistoryEntity>>, StatusCode> {
    match state.orchestrator.repository().list_histories(&id).await {
        Ok(histories) => Ok(Json(histories)),
        Err(e) => {
            tracing::error!("Failed to list histories of pipeline {}: {:#}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Pipelines with a live executor in this process
///
/// GET /api/executions
async fn list_executions(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "running": state.orchestrator.tracker().running_ids() }))
}

async fn ensure_exists(state: &AppState, id: &str) -> Result<(), StatusCode> {
    match state.orchestrator.get_pipeline(id).await {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to load pipeline {}: {:#}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
