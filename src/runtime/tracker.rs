/// In-flight execution tracking
///
/// Lock-free map of pipeline id -> live executor handle using ArcSwap. Updates go
/// through `rcu` so concurrent registrations from overlapping firings never lose
/// each other's entries. The tracker does bookkeeping only: it neither queues nor
/// rejects a second run of the same pipeline, it overwrites the entry.

use crate::runtime::executor::PipelineExecutor;
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};

type RunningMap = HashMap<String, Arc<dyn PipelineExecutor>>;

/// Process-scoped registry of running executors, injected into the orchestrator
pub struct ExecutionTracker {
    running: ArcSwap<RunningMap>,
}

impl Default for ExecutionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self {
            running: ArcSwap::new(Arc::new(HashMap::new())),
        }
    }

    /// Track an executor; returns true if an earlier run of the same pipeline was displaced
    pub fn register(&self, pipeline_id: &str, executor: Arc<dyn PipelineExecutor>) -> bool {
        let previous = self.running.rcu(|current| {
            let mut next = RunningMap::clone(current);
            next.insert(pipeline_id.to_string(), Arc::clone(&executor));
            next
        });

        let displaced = previous.contains_key(pipeline_id);
        if displaced {
            tracing::warn!(
                "⚠️ Pipeline {} started while a previous run is still executing; tracking the newest run",
                pipeline_id
            );
        }
        displaced
    }

    /// Stop tracking a pipeline; absent ids are ignored
    pub fn unregister(&self, pipeline_id: &str) {
        self.running.rcu(|current| {
            let mut next = RunningMap::clone(current);
            next.remove(pipeline_id);
            next
        });
    }

    /// Register and get a guard that unregisters when dropped
    ///
    /// The guard covers every exit path of a run, including early returns,
    /// errors and panics unwinding through the caller.
    pub fn track(&self, pipeline_id: &str, executor: Arc<dyn PipelineExecutor>) -> TrackedRun<'_> {
        self.register(pipeline_id, executor);
        TrackedRun {
            tracker: self,
            pipeline_id: pipeline_id.to_string(),
        }
    }

    /// Executor currently tracked for a pipeline
    pub fn get(&self, pipeline_id: &str) -> Option<Arc<dyn PipelineExecutor>> {
        self.running.load().get(pipeline_id).cloned()
    }

    pub fn is_running(&self, pipeline_id: &str) -> bool {
        self.running.load().contains_key(pipeline_id)
    }

    /// Ids of tracked pipelines, sorted
    pub fn running_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.running.load().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.running.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Scoped tracker registration
pub struct TrackedRun<'a> {
    tracker: &'a ExecutionTracker,
    pipeline_id: String,
}

impl Drop for TrackedRun<'_> {
    fn drop(&mut self) {
        self.tracker.unregister(&self.pipeline_id);
        tracing::debug!("🧹 Untracked pipeline {}", self.pipeline_id);
    }
}
