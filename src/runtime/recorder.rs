/// Run history recording
///
/// Persists run outcomes as three independent upserts keyed by run id: the
/// pipeline's cached status, the history snapshot and the history log. There is
/// no transaction across them; when any step fails the pipeline status is forced
/// to the error sentinel so it never stays "running" behind a broken record.

use crate::pipeline::{
    types::{now_millis, STATUS_ERROR, STATUS_RUNNING},
    HistoryEntity, HistoryLogEntity, PipelineDocument, PipelineRepository, PipelineSnapshot,
    RunHistory,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use uuid::Uuid;

/// Writes run history and mirrors run status onto the pipeline row
pub struct RunHistoryRecorder {
    repository: Arc<dyn PipelineRepository>,
}

impl RunHistoryRecorder {
    pub fn new(repository: Arc<dyn PipelineRepository>) -> Self {
        Self { repository }
    }

    /// Allocate a run id and write its initial "running" rows
    ///
    /// Called before the executor is invoked so every attempt has a row to
    /// reconcile against, even one that never reports back. If any of the rows
    /// cannot be written the pipeline status falls back to "error".
    pub async fn start(&self, user_id: &str, document: &PipelineDocument, start_time: i64) -> Result<RunHistory> {
        let history = RunHistory {
            id: Uuid::new_v4().to_string(),
            pipeline: PipelineSnapshot {
                document: document.clone(),
                status: STATUS_RUNNING.to_string(),
                start_time,
                end_time: None,
            },
            logs: Vec::new(),
        };

        if let Err(e) = self.record(user_id, &history).await {
            tracing::error!("❌ Failed to start run {} of pipeline {}: {:#}", history.id, document.id, e);
            if let Err(fallback) = self.mark_error(&document.id, start_time).await {
                tracing::error!("❌ Fallback status write failed for pipeline {}: {:#}", document.id, fallback);
            }
            return Err(e.context(format!("failed to start run history for pipeline {}", document.id)));
        }

        tracing::debug!("📝 Started run {} for pipeline {}", history.id, document.id);
        Ok(history)
    }

    /// Record a run snapshot
    ///
    /// 1. pipeline status + last history time
    /// 2. history row with the serialized snapshot
    /// 3. history log row with the serialized logs
    pub async fn record(&self, user_id: &str, history: &RunHistory) -> Result<()> {
        let snapshot = &history.pipeline;
        let pipeline_id = &snapshot.document.id;
        let now = now_millis();

        self.repository
            .update_pipeline_status(pipeline_id, &snapshot.status, snapshot.start_time)
            .await
            .with_context(|| format!("failed to update status of pipeline {}", pipeline_id))?;

        self.repository
            .save_history(&HistoryEntity {
                id: history.id.clone(),
                pipeline_id: pipeline_id.clone(),
                user_id: user_id.to_string(),
                content: serde_json::to_string(snapshot)?,
                created_at: snapshot.start_time,
                updated_at: now,
            })
            .await
            .with_context(|| format!("failed to save history {}", history.id))?;

        self.repository
            .save_history_log(&HistoryLogEntity {
                id: history.id.clone(),
                content: serde_json::to_string(&history.logs)?,
                created_at: snapshot.start_time,
                updated_at: now,
            })
            .await
            .with_context(|| format!("failed to save history log {}", history.id))?;

        tracing::debug!("💾 Recorded run {} of pipeline {} ({})", history.id, pipeline_id, snapshot.status);
        Ok(())
    }

    /// Fallback write: pipeline status becomes the error sentinel
    pub async fn mark_error(&self, pipeline_id: &str, start_time: i64) -> Result<()> {
        self.repository
            .update_pipeline_status(pipeline_id, STATUS_ERROR, start_time)
            .await
            .with_context(|| format!("failed to mark pipeline {} as errored", pipeline_id))
    }
}

/// Handle an executor uses to report run snapshots
///
/// Each call is an idempotent upsert on the run id, so intermediate and final
/// reports can arrive any number of times; the last one wins. A recording failure
/// applies the error fallback and is returned to the caller.
#[derive(Clone)]
pub struct HistoryReporter {
    recorder: Arc<RunHistoryRecorder>,
    user_id: String,
}

impl HistoryReporter {
    pub fn new(recorder: Arc<RunHistoryRecorder>, user_id: impl Into<String>) -> Self {
        Self {
            recorder,
            user_id: user_id.into(),
        }
    }

    /// Record a snapshot, degrading the pipeline status to "error" on failure
    pub async fn changed(&self, history: &RunHistory) -> Result<()> {
        let Err(e) = self.recorder.record(&self.user_id, history).await else {
            return Ok(());
        };

        let pipeline_id = &history.pipeline.document.id;
        tracing::error!(
            "❌ Failed to record run {} of pipeline {}: {:#}",
            history.id,
            pipeline_id,
            e
        );

        if let Err(fallback) = self
            .recorder
            .mark_error(pipeline_id, history.pipeline.start_time)
            .await
        {
            tracing::error!("❌ Fallback status write failed for pipeline {}: {:#}", pipeline_id, fallback);
        }

        Err(e)
    }
}
