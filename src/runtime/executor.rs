/// Pipeline executor contract and the built-in sequential executor
///
/// The orchestrator only depends on `PipelineExecutor` and `ExecutorFactory`.
/// `SequentialExecutor` runs stages in order with a small set of step types:
/// - log: append a message to the run log
/// - sleep: wait `ms` milliseconds
/// - http: call an URL with reqwest, optionally with a bearer credential
/// - email: send a notification through the email provider
/// - file: write `content` to `key` through the storage provider

use crate::{
    pipeline::{
        types::{now_millis, STATUS_FAILED, STATUS_RUNNING, STATUS_SUCCESS},
        LogEntry, PipelineDocument, PipelineSnapshot, RunHistory, Step,
    },
    runtime::{providers::Collaborators, recorder::HistoryReporter, trigger::TriggerClass},
};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::{path::PathBuf, sync::Arc, time::Duration};

/// A single pipeline run
#[async_trait]
pub trait PipelineExecutor: Send + Sync {
    /// Prepare the run (validation, working directories)
    async fn init(&self) -> Result<()>;

    /// Execute all stages under the pre-allocated history id
    async fn run(&self, history_id: &str, trigger: TriggerClass) -> Result<()>;
}

/// Everything an executor is bound to at construction
#[derive(Clone)]
pub struct ExecutorContext {
    pub user_id: String,
    pub pipeline: PipelineDocument,
    /// Start time of the run, shared with its pre-allocated history
    pub start_time: i64,
    /// Called with run snapshots, at least once when the run completes
    pub on_changed: HistoryReporter,
    pub collaborators: Collaborators,
    pub file_root_dir: PathBuf,
}

/// Builds executors for the orchestrator
pub trait ExecutorFactory: Send + Sync {
    fn create(&self, context: ExecutorContext) -> Result<Arc<dyn PipelineExecutor>>;
}

/// Factory for `SequentialExecutor`
#[derive(Debug, Default)]
pub struct SequentialExecutorFactory {
    http: reqwest::Client,
}

impl SequentialExecutorFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutorFactory for SequentialExecutorFactory {
    fn create(&self, context: ExecutorContext) -> Result<Arc<dyn PipelineExecutor>> {
        Ok(Arc::new(SequentialExecutor {
            context,
            http: self.http.clone(),
        }))
    }
}

const STEP_KINDS: [&str; 5] = ["log", "sleep", "http", "email", "file"];

/// Runs stages one after another, stopping at the first failing step
pub struct SequentialExecutor {
    context: ExecutorContext,
    http: reqwest::Client,
}

impl SequentialExecutor {
    fn snapshot(&self, status: &str, start_time: i64, end_time: Option<i64>) -> PipelineSnapshot {
        PipelineSnapshot {
            document: self.context.pipeline.clone(),
            status: status.to_string(),
            start_time,
            end_time,
        }
    }

    async fn execute_step(&self, stage_id: &str, step: &Step, logs: &mut Vec<LogEntry>) -> Result<()> {
        tracing::debug!("🚀 Executing step {} ({}) in stage {}", step.id, step.kind, stage_id);

        match step.kind.as_str() {
            "log" => {
                let message = str_prop(&step.props, "message").unwrap_or_default();
                logs.push(LogEntry::info(Some(stage_id), message));
            }
            "sleep" => {
                let ms = step.props.get("ms").and_then(Value::as_u64).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                logs.push(LogEntry::info(Some(stage_id), format!("slept {}ms", ms)));
            }
            "http" => self.execute_http_step(stage_id, step, logs).await?,
            "email" => {
                let to = str_prop(&step.props, "to").context("email step missing 'to'")?;
                let subject = str_prop(&step.props, "subject").unwrap_or_default();
                let body = str_prop(&step.props, "body").unwrap_or_default();
                self.context.collaborators.email.send(&to, &subject, &body).await?;
                logs.push(LogEntry::info(Some(stage_id), format!("email sent to {}", to)));
            }
            "file" => {
                let key = str_prop(&step.props, "key").context("file step missing 'key'")?;
                let content = str_prop(&step.props, "content").unwrap_or_default();
                self.context
                    .collaborators
                    .storage
                    .put(&key, content.into_bytes())
                    .await?;
                logs.push(LogEntry::info(Some(stage_id), format!("wrote {}", key)));
            }
            other => bail!("unsupported step type '{}'", other),
        }

        Ok(())
    }

    async fn execute_http_step(&self, stage_id: &str, step: &Step, logs: &mut Vec<LogEntry>) -> Result<()> {
        let url = str_prop(&step.props, "url").context("http step missing 'url'")?;
        let method = str_prop(&step.props, "method").unwrap_or_else(|| "GET".to_string());

        let mut request = match method.to_uppercase().as_str() {
            "GET" => self.http.get(&url),
            "POST" => self.http.post(&url),
            "PUT" => self.http.put(&url),
            "DELETE" => self.http.delete(&url),
            "PATCH" => self.http.patch(&url),
            _ => bail!("unsupported HTTP method: {}", method),
        };

        if let Some(headers) = step.props.get("headers").and_then(Value::as_object) {
            for (key, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(key.as_str(), value);
                }
            }
        }

        if let Some(name) = str_prop(&step.props, "credential") {
            let token = self
                .context
                .collaborators
                .access
                .credential(&self.context.user_id, &name)
                .await?
                .with_context(|| format!("credential '{}' not found", name))?;
            request = request.bearer_auth(token);
        }

        if let Some(body) = step.props.get("body") {
            request = match body {
                Value::String(text) => request.body(text.clone()),
                other => request.json(other),
            };
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("HTTP request to {} failed", url))?;
        let status = response.status();
        logs.push(LogEntry::info(Some(stage_id), format!("{} {} -> {}", method, url, status)));

        if !status.is_success() {
            bail!("{} {} returned {}", method, url, status);
        }
        Ok(())
    }
}

#[async_trait]
impl PipelineExecutor for SequentialExecutor {
    async fn init(&self) -> Result<()> {
        for stage in &self.context.pipeline.stages {
            for step in &stage.steps {
                if !STEP_KINDS.contains(&step.kind.as_str()) {
                    bail!(
                        "stage '{}' step '{}' has unsupported type '{}'",
                        stage.id,
                        step.id,
                        step.kind
                    );
                }
            }
        }

        tokio::fs::create_dir_all(&self.context.file_root_dir)
            .await
            .with_context(|| format!("failed to create file root {}", self.context.file_root_dir.display()))?;
        Ok(())
    }

    async fn run(&self, history_id: &str, trigger: TriggerClass) -> Result<()> {
        let pipeline = &self.context.pipeline;
        let start_time = self.context.start_time;
        let mut logs = vec![LogEntry::info(
            None,
            format!("run {} started by {} trigger", history_id, trigger),
        )];
        let mut failed = false;

        tracing::info!("🚀 Running pipeline {} ({} stages) as {}", pipeline.id, pipeline.stages.len(), history_id);

        'stages: for stage in &pipeline.stages {
            logs.push(LogEntry::info(Some(stage.id.as_str()), format!("stage '{}' started", stage.title)));

            for step in &stage.steps {
                if let Err(e) = self.execute_step(&stage.id, step, &mut logs).await {
                    tracing::warn!("❌ Step {} of pipeline {} failed: {:#}", step.id, pipeline.id, e);
                    logs.push(LogEntry::error(Some(stage.id.as_str()), format!("step '{}' failed: {:#}", step.id, e)));
                    failed = true;
                    break 'stages;
                }
            }

            logs.push(LogEntry::info(Some(stage.id.as_str()), format!("stage '{}' finished", stage.title)));
            let progress = RunHistory {
                id: history_id.to_string(),
                pipeline: self.snapshot(STATUS_RUNNING, start_time, None),
                logs: logs.clone(),
            };
            self.context.on_changed.changed(&progress).await?;
        }

        let status = if failed { STATUS_FAILED } else { STATUS_SUCCESS };
        let finished = RunHistory {
            id: history_id.to_string(),
            pipeline: self.snapshot(status, start_time, Some(now_millis())),
            logs,
        };
        self.context.on_changed.changed(&finished).await?;

        tracing::info!("✅ Pipeline {} finished run {} ({})", pipeline.id, history_id, status);
        Ok(())
    }
}

fn str_prop(props: &Value, key: &str) -> Option<String> {
    props.get(key).and_then(Value::as_str).map(str::to_string)
}
