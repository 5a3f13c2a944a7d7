/// Trigger resolution
///
/// Maps a pipeline document plus the trigger id a firing carried to the kind of
/// run it should start, and derives the timer names used by the cron registry.

use crate::{pipeline::PipelineDocument, runtime::cron::CronRegistry};
use std::{fmt, sync::Arc};

/// How a firing was classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerClass {
    /// User-initiated run, no trigger id
    Manual,
    /// Trigger id found in the pipeline
    Timer,
    /// Trigger id no longer present; the run is aborted
    None,
}

impl TriggerClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerClass::Manual => "manual",
            TriggerClass::Timer => "timer",
            TriggerClass::None => "none",
        }
    }
}

impl fmt::Display for TriggerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification together with the trigger id it was computed for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub class: TriggerClass,
    pub trigger_id: Option<String>,
}

/// Timer name for a pipeline trigger: `pipeline.<id>.trigger.<triggerId>`
pub fn timer_name(pipeline_id: &str, trigger_id: &str) -> String {
    format!("{}{}", trigger_prefix(pipeline_id), trigger_id)
}

/// Timer name for an ad hoc fire: `pipeline.<id>.trigger-once`
pub fn once_timer_name(pipeline_id: &str) -> String {
    format!("pipeline.{}.trigger-once", pipeline_id)
}

/// Prefix shared by every trigger timer of one pipeline
pub fn trigger_prefix(pipeline_id: &str) -> String {
    format!("pipeline.{}.trigger.", pipeline_id)
}

/// Pure classification, no side effects
pub fn classify(trigger_id: Option<&str>, pipeline: &PipelineDocument) -> Classification {
    let class = match trigger_id {
        None => TriggerClass::Manual,
        Some(id) if pipeline.find_trigger(id).is_some() => TriggerClass::Timer,
        Some(_) => TriggerClass::None,
    };

    Classification {
        class,
        trigger_id: trigger_id.map(str::to_string),
    }
}

/// Classifies firings and removes timers whose trigger was deleted
pub struct TriggerResolver {
    cron: Arc<CronRegistry>,
}

impl TriggerResolver {
    pub fn new(cron: Arc<CronRegistry>) -> Self {
        Self { cron }
    }

    /// Classify a firing; a stale trigger id also removes its dangling timer
    pub async fn resolve(&self, trigger_id: Option<&str>, pipeline: &PipelineDocument) -> Classification {
        let classification = classify(trigger_id, pipeline);

        if let (TriggerClass::None, Some(id)) = (classification.class, trigger_id) {
            let name = timer_name(&pipeline.id, id);
            tracing::info!(
                "⏭️ Trigger {} no longer exists on pipeline {}, removing timer {}",
                id,
                pipeline.id,
                name
            );
            self.cron.remove(&name).await;
        }

        classification
    }
}
