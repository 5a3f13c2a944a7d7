/// Core pipeline type definitions
///
/// Pipeline documents are user-authored JSON stored as an opaque text blob on the
/// pipeline row. Everything that touches triggers or execution parses them through
/// `PipelineDocument::parse` so schedule expressions are validated up front.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Status written while a run is in flight
pub const STATUS_RUNNING: &str = "running";
/// Terminal status for a run whose stages all completed
pub const STATUS_SUCCESS: &str = "success";
/// Terminal status for a run with a failing step
pub const STATUS_FAILED: &str = "failed";
/// Sentinel forced onto the pipeline when its run history could not be recorded
pub const STATUS_ERROR: &str = "error";

/// A complete pipeline definition: ordered stages plus triggers
///
/// Unknown fields are ignored and every field defaults, so documents written by
/// older or newer versions keep loading.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDocument {
    /// Pipeline identifier (numbers are accepted and kept as strings)
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    /// Human-readable title, mirrored onto the pipeline row on save
    #[serde(default)]
    pub title: String,
    /// Disabled pipelines never have live timers
    #[serde(default)]
    pub disabled: bool,
    /// Stages run in order by the executor
    #[serde(default)]
    pub stages: Vec<Stage>,
    /// Manual and scheduled triggers
    #[serde(default)]
    pub triggers: Vec<Trigger>,
}

/// A single stage in the pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// A step inside a stage
///
/// `kind` selects the handler in the executor ("log", "sleep", "http", "email",
/// "file"), `props` carries its configuration as flexible JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Step {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub props: Value,
}

/// A trigger definition as authored by the user
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    /// Stable user-assigned id, part of the timer name
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub props: TriggerProps,
}

/// Trigger configuration bag
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TriggerProps {
    /// Cron expression; absent or blank means manual only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
}

/// Typed view of a trigger's schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerKind {
    /// Only fired by hand
    Manual,
    /// Fired by the cron registry on the given expression
    Cron(String),
}

impl Trigger {
    /// Classify the trigger by its schedule field
    pub fn kind(&self) -> TriggerKind {
        match self.props.cron.as_deref().map(str::trim) {
            Some(expr) if !expr.is_empty() => TriggerKind::Cron(expr.to_string()),
            _ => TriggerKind::Manual,
        }
    }

    /// Cron expression if this trigger is schedule-bearing
    pub fn cron(&self) -> Option<String> {
        match self.kind() {
            TriggerKind::Cron(expr) => Some(expr),
            TriggerKind::Manual => None,
        }
    }
}

impl PipelineDocument {
    /// Parse and validate a stored document
    ///
    /// Cron expressions must have five to seven whitespace separated fields; the
    /// registry does the full schedule parse when the timer is added.
    pub fn parse(content: &str) -> Result<Self> {
        let document: PipelineDocument = serde_json::from_str(content)
            .context("pipeline content is not a valid pipeline document")?;

        for trigger in &document.triggers {
            if let TriggerKind::Cron(expr) = trigger.kind() {
                let fields = expr.split_whitespace().count();
                if !(5..=7).contains(&fields) {
                    bail!(
                        "trigger '{}' has an invalid cron expression '{}' ({} fields)",
                        trigger.id,
                        expr,
                        fields
                    );
                }
            }
        }

        Ok(document)
    }

    /// Look a trigger up by id (trigger lists are small)
    pub fn find_trigger(&self, trigger_id: &str) -> Option<&Trigger> {
        self.triggers.iter().find(|trigger| trigger.id == trigger_id)
    }

    /// Triggers that carry a schedule, paired with their expression
    pub fn scheduled_triggers(&self) -> impl Iterator<Item = (&Trigger, String)> {
        self.triggers
            .iter()
            .filter_map(|trigger| trigger.cron().map(|expr| (trigger, expr)))
    }
}

/// Persisted projection of a pipeline
///
/// `status` and `last_history_time` belong to the orchestrator and are only
/// written when a run starts or completes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineEntity {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub disabled: bool,
    /// Serialized `PipelineDocument`
    pub content: String,
    pub status: Option<String>,
    /// Start time (unix millis) of the last recorded run
    pub last_history_time: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl PipelineEntity {
    /// Parse the stored document
    pub fn document(&self) -> Result<PipelineDocument> {
        PipelineDocument::parse(&self.content)
            .with_context(|| format!("failed to parse content of pipeline {}", self.id))
    }
}

/// Durable record of one run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntity {
    /// Run id
    pub id: String,
    pub pipeline_id: String,
    pub user_id: String,
    /// Serialized `PipelineSnapshot`
    pub content: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Durable log record of one run, keyed by the same run id as its history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryLogEntity {
    pub id: String,
    /// Serialized `Vec<LogEntry>`
    pub content: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Pipeline state captured at run time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSnapshot {
    #[serde(flatten)]
    pub document: PipelineDocument,
    pub status: String,
    /// Run start (unix millis)
    pub start_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
}

/// A single accumulated log line
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub time: i64,
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_id: Option<String>,
    pub message: String,
}

impl LogEntry {
    pub fn info(stage_id: Option<&str>, message: impl Into<String>) -> Self {
        Self::new("info", stage_id, message)
    }

    pub fn error(stage_id: Option<&str>, message: impl Into<String>) -> Self {
        Self::new("error", stage_id, message)
    }

    fn new(level: &str, stage_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            time: now_millis(),
            level: level.to_string(),
            stage_id: stage_id.map(str::to_string),
            message: message.into(),
        }
    }
}

/// Transient result of an executor run, reported through `onChanged`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunHistory {
    /// Run id allocated before the executor starts
    pub id: String,
    pub pipeline: PipelineSnapshot,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

/// Current time in unix milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}
