/// Pipeline orchestration
///
/// Owns the trigger lifecycle (startup reload, register on save, deregister on
/// delete, ad hoc fires) and maps each firing to exactly one executor run:
/// load -> classify -> construct executor -> start history -> track -> init/run
/// -> untrack. Runs of the same pipeline are not serialized; overlapping runs are
/// allowed and the last status write wins.

use crate::{
    config::SchedulerConfig,
    pipeline::{
        types::{now_millis, STATUS_ERROR},
        LogEntry, PipelineDocument, PipelineEntity, PipelineRepository, RunHistory,
    },
    runtime::{
        cron::{CronJob, CronRegistry, JobFuture},
        executor::{ExecutorContext, ExecutorFactory},
        providers::Collaborators,
        recorder::{HistoryReporter, RunHistoryRecorder},
        tracker::ExecutionTracker,
        trigger::{once_timer_name, timer_name, trigger_prefix, TriggerClass, TriggerResolver},
    },
};
use anyhow::{bail, Context, Result};
use std::{
    collections::HashSet,
    path::PathBuf,
    sync::{Arc, Weak},
};

/// What a call to `run` ended up doing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Pipeline no longer exists
    NotFound,
    /// Pipeline has no stages; nothing to run
    NoStages,
    /// Trigger was deleted after its timer was scheduled; timer removed
    StaleTrigger,
    /// Executor ran to completion under this run id
    Completed { history_id: String },
}

/// Top-level orchestrator for pipeline triggers and runs
pub struct PipelineOrchestrator {
    /// Handle to ourselves for timer jobs; jobs must not keep the orchestrator alive
    me: Weak<PipelineOrchestrator>,
    repository: Arc<dyn PipelineRepository>,
    cron: Arc<CronRegistry>,
    resolver: TriggerResolver,
    tracker: Arc<ExecutionTracker>,
    recorder: Arc<RunHistoryRecorder>,
    executors: Arc<dyn ExecutorFactory>,
    collaborators: Collaborators,
    file_root_dir: PathBuf,
    reload_batch_size: i64,
}

impl PipelineOrchestrator {
    /// Wire the orchestrator; the tracker is injected so callers can observe it
    pub fn new(
        repository: Arc<dyn PipelineRepository>,
        cron: Arc<CronRegistry>,
        tracker: Arc<ExecutionTracker>,
        executors: Arc<dyn ExecutorFactory>,
        collaborators: Collaborators,
        config: &SchedulerConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            recorder: Arc::new(RunHistoryRecorder::new(Arc::clone(&repository))),
            resolver: TriggerResolver::new(Arc::clone(&cron)),
            repository,
            cron,
            tracker,
            executors,
            collaborators,
            file_root_dir: PathBuf::from(&config.file_root_dir),
            reload_batch_size: config.reload_batch_size.max(1),
        })
    }

    pub fn tracker(&self) -> &Arc<ExecutionTracker> {
        &self.tracker
    }

    pub fn cron(&self) -> &Arc<CronRegistry> {
        &self.cron
    }

    pub fn repository(&self) -> &Arc<dyn PipelineRepository> {
        &self.repository
    }

    /// Pipeline detail by id
    pub async fn get_pipeline(&self, pipeline_id: &str) -> Result<Option<PipelineEntity>> {
        self.repository.get_pipeline(pipeline_id).await
    }

    /// Re-register every schedule-bearing trigger of every enabled pipeline
    ///
    /// Pipelines are paged by id so the reload never loads the whole table at once.
    /// A pipeline whose document fails to parse is skipped and logged.
    pub async fn reload_triggers(&self) -> Result<usize> {
        tracing::info!("📥 Reloading pipeline triggers (batch size {})", self.reload_batch_size);

        let mut offset = 0;
        let mut pipelines = 0;
        let mut timers = 0;

        loop {
            let ids = self
                .repository
                .find_enabled_pipeline_ids(offset, self.reload_batch_size)
                .await
                .context("failed to page enabled pipelines")?;
            if ids.is_empty() {
                break;
            }

            for entity in self.repository.find_pipelines_by_ids(&ids).await? {
                let document = match entity.document() {
                    Ok(document) => document,
                    Err(e) => {
                        tracing::warn!("⚠️ Skipping pipeline {} during reload: {:#}", entity.id, e);
                        continue;
                    }
                };

                match self.register_document(&entity.id, &document).await {
                    Ok(count) => {
                        pipelines += 1;
                        timers += count;
                    }
                    Err(e) => tracing::warn!("⚠️ Failed to register triggers of pipeline {}: {:#}", entity.id, e),
                }
            }

            if (ids.len() as i64) < self.reload_batch_size {
                break;
            }
            offset += ids.len() as i64;
        }

        tracing::info!(
            "📊 Reloaded {} timers from {} pipelines ({} live)",
            timers,
            pipelines,
            self.cron.size().await
        );
        Ok(timers)
    }

    /// Parse, persist and register a pipeline document
    ///
    /// The title and disabled flag are re-derived from the document. Status fields
    /// and creation time belong to the stored row and are never written here.
    pub async fn save_pipeline(&self, user_id: &str, content: &str) -> Result<PipelineEntity> {
        let document = PipelineDocument::parse(content)?;
        if document.id.is_empty() {
            bail!("pipeline document has no id");
        }

        let now = now_millis();
        let entity = PipelineEntity {
            id: document.id.clone(),
            user_id: user_id.to_string(),
            title: document.title.clone(),
            disabled: document.disabled,
            content: content.to_string(),
            status: None,
            last_history_time: None,
            created_at: now,
            updated_at: now,
        };

        self.repository
            .save_pipeline(&entity)
            .await
            .with_context(|| format!("failed to save pipeline {}", entity.id))?;
        tracing::info!("💾 Saved pipeline {} ({})", entity.id, entity.title);

        self.register_triggers(&entity).await?;

        // Reread so the caller sees the status a previous run left behind
        let stored = self.repository.get_pipeline(&entity.id).await?;
        Ok(stored.unwrap_or(entity))
    }

    /// Bring the timers of one pipeline in line with its stored document
    ///
    /// Returns the number of schedule-bearing triggers registered. A disabled
    /// pipeline ends up with no timers at all.
    pub async fn register_triggers(&self, entity: &PipelineEntity) -> Result<usize> {
        let document = entity.document()?;
        self.register_document(&entity.id, &document).await
    }

    async fn register_document(&self, pipeline_id: &str, document: &PipelineDocument) -> Result<usize> {
        let disabled = document.disabled;
        let wanted: Vec<(String, String, String)> = if disabled {
            Vec::new()
        } else {
            document
                .scheduled_triggers()
                .map(|(trigger, cron)| (timer_name(pipeline_id, &trigger.id), trigger.id.clone(), cron))
                .collect()
        };
        let wanted_names: HashSet<&str> = wanted.iter().map(|(name, _, _)| name.as_str()).collect();

        for name in self.cron.names_with_prefix(&trigger_prefix(pipeline_id)).await {
            if !wanted_names.contains(name.as_str()) {
                self.cron.remove(&name).await;
            }
        }
        if disabled {
            self.cron.remove(&once_timer_name(pipeline_id)).await;
            tracing::debug!("⏸️ Pipeline {} is disabled, no timers registered", pipeline_id);
            return Ok(0);
        }

        for (name, trigger_id, cron) in &wanted {
            let job = self.job(pipeline_id, Some(trigger_id.clone()));
            self.cron.register(name, Some(cron.as_str()), job).await?;
        }

        tracing::info!("🔥 Registered {} timers for pipeline {}", wanted.len(), pipeline_id);
        Ok(wanted.len())
    }

    /// Remove the timers of every trigger in the document; returns how many existed
    pub async fn unregister_triggers(&self, pipeline_id: &str, document: &PipelineDocument) -> usize {
        let mut removed = 0;
        for trigger in &document.triggers {
            if self.cron.remove(&timer_name(pipeline_id, &trigger.id)).await {
                removed += 1;
            }
        }
        removed
    }

    /// Deregister a pipeline's timers, then delete it; history is kept
    pub async fn delete_pipeline(&self, pipeline_id: &str) -> Result<bool> {
        let Some(entity) = self.repository.get_pipeline(pipeline_id).await? else {
            return Ok(false);
        };

        let removed = match entity.document() {
            Ok(document) => self.unregister_triggers(pipeline_id, &document).await,
            Err(e) => {
                tracing::warn!("⚠️ Pipeline {} has unreadable content, removing timers by prefix: {:#}", pipeline_id, e);
                let mut removed = 0;
                for name in self.cron.names_with_prefix(&trigger_prefix(pipeline_id)).await {
                    if self.cron.remove(&name).await {
                        removed += 1;
                    }
                }
                removed
            }
        };
        self.cron.remove(&once_timer_name(pipeline_id)).await;

        let deleted = self.repository.delete_pipelines(&[pipeline_id.to_string()]).await? > 0;
        tracing::info!("🗑️ Deleted pipeline {} ({} timers removed)", pipeline_id, removed);
        Ok(deleted)
    }

    /// Schedule a one-off manual run under the `trigger-once` timer name
    pub async fn fire_once(&self, pipeline_id: &str) -> Result<()> {
        if self.repository.get_pipeline(pipeline_id).await?.is_none() {
            bail!("pipeline {} not found", pipeline_id);
        }

        let job = self.job(pipeline_id, None);
        self.cron.register(&once_timer_name(pipeline_id), None, job).await
    }

    /// Timer job: a firing runs the pipeline on its own task
    fn job(&self, pipeline_id: &str, trigger_id: Option<String>) -> CronJob {
        let me = self.me.clone();
        let pipeline_id = pipeline_id.to_string();

        Arc::new(move || -> JobFuture {
            let me = me.clone();
            let pipeline_id = pipeline_id.clone();
            let trigger_id = trigger_id.clone();

            Box::pin(async move {
                let Some(orchestrator) = me.upgrade() else {
                    return;
                };
                tracing::debug!("🔔 Timer fired for pipeline {} (trigger {:?})", pipeline_id, trigger_id);
                if let Err(e) = orchestrator.run(&pipeline_id, trigger_id.as_deref()).await {
                    tracing::debug!("⏭️ Timer run of pipeline {} ended with error: {:#}", pipeline_id, e);
                }
            })
        })
    }

    /// Execute a pipeline for a timer firing or a manual call
    pub async fn run(&self, pipeline_id: &str, trigger_id: Option<&str>) -> Result<RunOutcome> {
        let Some(entity) = self.repository.get_pipeline(pipeline_id).await? else {
            tracing::debug!("⏭️ Skipping run of deleted pipeline {}", pipeline_id);
            return Ok(RunOutcome::NotFound);
        };

        let mut document = entity.document()?;
        document.id = entity.id.clone();

        if document.stages.is_empty() {
            tracing::debug!("⏭️ Pipeline {} has no stages, nothing to run", pipeline_id);
            return Ok(RunOutcome::NoStages);
        }

        let classification = self.resolver.resolve(trigger_id, &document).await;
        if classification.class == TriggerClass::None {
            return Ok(RunOutcome::StaleTrigger);
        }

        let start_time = now_millis();
        let reporter = HistoryReporter::new(Arc::clone(&self.recorder), entity.user_id.clone());
        let executor = self.executors.create(ExecutorContext {
            user_id: entity.user_id.clone(),
            pipeline: document.clone(),
            start_time,
            on_changed: reporter.clone(),
            collaborators: self.collaborators.clone(),
            file_root_dir: self.file_root_dir.clone(),
        })?;

        let history = self.recorder.start(&entity.user_id, &document, start_time).await?;
        tracing::info!(
            "🚀 Starting run {} of pipeline {} ({} trigger)",
            history.id,
            pipeline_id,
            classification.class
        );

        let result = {
            let _tracked = self.tracker.track(pipeline_id, Arc::clone(&executor));
            match executor.init().await {
                Ok(()) => executor.run(&history.id, classification.class).await,
                Err(e) => Err(e),
            }
        };

        match result {
            Ok(()) => Ok(RunOutcome::Completed { history_id: history.id }),
            Err(e) => {
                tracing::error!("❌ Run {} of pipeline {} failed: {:#}", history.id, pipeline_id, e);
                self.record_crash(&reporter, history, &e).await;
                Err(e)
            }
        }
    }

    /// Settle the pre-allocated history of a run whose executor errored out
    async fn record_crash(&self, reporter: &HistoryReporter, mut history: RunHistory, error: &anyhow::Error) {
        history.pipeline.status = STATUS_ERROR.to_string();
        history.pipeline.end_time = Some(now_millis());
        history.logs.push(LogEntry::error(None, format!("{:#}", error)));

        if let Err(e) = reporter.changed(&history).await {
            tracing::debug!("⏭️ Crash record of run {} not stored: {:#}", history.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{
        types::{STATUS_RUNNING, STATUS_SUCCESS},
        PipelineSnapshot, SqliteRepository,
    };
    use crate::runtime::{executor::PipelineExecutor, recorder::tests::FlakyRepository};
    use async_trait::async_trait;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    /// What the scripted executor does when run
    #[derive(Clone, Copy, PartialEq)]
    enum Script {
        Succeed,
        FailInit,
        FailRun,
    }

    /// Factory recording every construction; its executors report through on_changed
    struct ScriptedFactory {
        script: Script,
        created: AtomicUsize,
        seen_running: Arc<Mutex<Vec<bool>>>,
        tracker: Mutex<Option<Arc<ExecutionTracker>>>,
    }

    impl ScriptedFactory {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                created: AtomicUsize::new(0),
                seen_running: Arc::new(Mutex::new(Vec::new())),
                tracker: Mutex::new(None),
            })
        }
    }

    struct ScriptedExecutor {
        script: Script,
        context: ExecutorContext,
        seen_running: Arc<Mutex<Vec<bool>>>,
        tracker: Option<Arc<ExecutionTracker>>,
    }

    impl ExecutorFactory for ScriptedFactory {
        fn create(&self, context: ExecutorContext) -> Result<Arc<dyn PipelineExecutor>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(ScriptedExecutor {
                script: self.script,
                context,
                seen_running: Arc::clone(&self.seen_running),
                tracker: self.tracker.lock().unwrap().clone(),
            }))
        }
    }

    #[async_trait]
    impl PipelineExecutor for ScriptedExecutor {
        async fn init(&self) -> Result<()> {
            if let Some(tracker) = &self.tracker {
                self.seen_running
                    .lock()
                    .unwrap()
                    .push(tracker.is_running(&self.context.pipeline.id));
            }
            if self.script == Script::FailInit {
                bail!("init exploded");
            }
            Ok(())
        }

        async fn run(&self, history_id: &str, _trigger: TriggerClass) -> Result<()> {
            if self.script == Script::FailRun {
                bail!("run exploded");
            }
            let history = RunHistory {
                id: history_id.to_string(),
                pipeline: PipelineSnapshot {
                    document: self.context.pipeline.clone(),
                    status: STATUS_SUCCESS.into(),
                    start_time: self.context.start_time,
                    end_time: Some(now_millis()),
                },
                logs: vec![LogEntry::info(None, "all good")],
            };
            self.context.on_changed.changed(&history).await
        }
    }

    struct Harness {
        orchestrator: Arc<PipelineOrchestrator>,
        factory: Arc<ScriptedFactory>,
        repository: Arc<dyn PipelineRepository>,
    }

    async fn harness_with(repository: Arc<dyn PipelineRepository>, script: Script, batch: i64) -> Harness {
        let cron = Arc::new(CronRegistry::new().await.unwrap());
        let tracker = Arc::new(ExecutionTracker::new());
        let factory = ScriptedFactory::new(script);
        *factory.tracker.lock().unwrap() = Some(Arc::clone(&tracker));

        let config = SchedulerConfig {
            reload_batch_size: batch,
            file_root_dir: std::env::temp_dir().join("pipewright-orch").display().to_string(),
        };
        let orchestrator = PipelineOrchestrator::new(
            Arc::clone(&repository),
            cron,
            tracker,
            factory.clone(),
            Collaborators::local(&config.file_root_dir),
            &config,
        );

        Harness { orchestrator, factory, repository }
    }

    async fn harness(script: Script) -> Harness {
        let repository: Arc<dyn PipelineRepository> = Arc::new(SqliteRepository::in_memory().await.unwrap());
        harness_with(repository, script, 20).await
    }

    const E2E: &str = r#"{
        "id": 1,
        "title": "every five",
        "stages": [{ "id": "s1", "steps": [] }],
        "triggers": [{ "id": "t1", "props": { "cron": "*/5 * * * *" } }]
    }"#;

    #[tokio::test(flavor = "multi_thread")]
    async fn save_fire_and_record_end_to_end() {
        let h = harness(Script::Succeed).await;

        let entity = h.orchestrator.save_pipeline("u1", E2E).await.unwrap();
        assert_eq!(entity.id, "1");
        assert_eq!(entity.title, "every five");
        assert!(h.orchestrator.cron().contains("pipeline.1.trigger.t1").await);

        let outcome = h.orchestrator.run("1", Some("t1")).await.unwrap();
        let RunOutcome::Completed { history_id } = outcome else {
            panic!("expected a completed run, got {:?}", outcome);
        };
        assert_eq!(h.factory.created.load(Ordering::SeqCst), 1);
        assert_eq!(h.factory.seen_running.lock().unwrap().as_slice(), [true]);

        let history = h.repository.get_history(&history_id).await.unwrap().unwrap();
        let pipeline = h.repository.get_pipeline("1").await.unwrap().unwrap();
        assert_eq!(pipeline.status.as_deref(), Some(STATUS_SUCCESS));
        assert_eq!(pipeline.last_history_time, Some(history.created_at));
        let snapshot: PipelineSnapshot = serde_json::from_str(&history.content).unwrap();
        assert_eq!(snapshot.start_time, history.created_at);

        assert_eq!(history.pipeline_id, "1");
        assert_eq!(history.user_id, "u1");
        assert!(h.repository.get_history_log(&history_id).await.unwrap().is_some());
        assert!(h.orchestrator.tracker().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resaving_replaces_timers_instead_of_duplicating() {
        let h = harness(Script::Succeed).await;

        h.orchestrator.save_pipeline("u1", E2E).await.unwrap();
        h.orchestrator.save_pipeline("u1", E2E).await.unwrap();
        assert_eq!(h.orchestrator.cron().size().await, 1);

        // dropping the schedule removes the timer, manual triggers never get one
        h.orchestrator
            .save_pipeline(
                "u1",
                r#"{ "id": 1, "stages": [{ "id": "s1" }], "triggers": [{ "id": "t1", "props": {} }] }"#,
            )
            .await
            .unwrap();
        assert_eq!(h.orchestrator.cron().size().await, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stale_trigger_removes_timer_without_building_an_executor() {
        let h = harness(Script::Succeed).await;
        h.orchestrator.save_pipeline("u1", E2E).await.unwrap();

        // simulate a timer left behind by a trigger that was deleted
        let job = h.orchestrator.job("1", Some("old".into()));
        h.orchestrator
            .cron()
            .register(&timer_name("1", "old"), Some("0 * * * *"), job)
            .await
            .unwrap();

        let outcome = h.orchestrator.run("1", Some("old")).await.unwrap();
        assert_eq!(outcome, RunOutcome::StaleTrigger);
        assert!(!h.orchestrator.cron().contains("pipeline.1.trigger.old").await);
        assert!(h.orchestrator.cron().contains("pipeline.1.trigger.t1").await);
        assert_eq!(h.factory.created.load(Ordering::SeqCst), 0);
        assert!(h.repository.list_histories("1").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn manual_run_proceeds_and_empty_pipeline_is_a_no_op() {
        let h = harness(Script::Succeed).await;
        h.orchestrator
            .save_pipeline("u1", r#"{ "id": "empty", "stages": [] }"#)
            .await
            .unwrap();
        h.orchestrator
            .save_pipeline("u1", r#"{ "id": "full", "stages": [{ "id": "s1" }] }"#)
            .await
            .unwrap();

        assert_eq!(h.orchestrator.run("empty", None).await.unwrap(), RunOutcome::NoStages);
        assert_eq!(h.factory.seen_running.lock().unwrap().len(), 0);

        let outcome = h.orchestrator.run("full", None).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Completed { .. }));
        assert_eq!(h.factory.created.load(Ordering::SeqCst), 1);

        assert_eq!(h.orchestrator.run("missing", None).await.unwrap(), RunOutcome::NotFound);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn executor_failures_are_rethrown_and_untracked() {
        for script in [Script::FailInit, Script::FailRun] {
            let h = harness(script).await;
            h.orchestrator.save_pipeline("u1", E2E).await.unwrap();

            let err = h.orchestrator.run("1", None).await.unwrap_err();
            assert!(err.to_string().contains("exploded"));
            assert!(h.orchestrator.tracker().is_empty());

            let pipeline = h.repository.get_pipeline("1").await.unwrap().unwrap();
            assert_eq!(pipeline.status.as_deref(), Some(STATUS_ERROR));
            let histories = h.repository.list_histories("1").await.unwrap();
            assert_eq!(histories.len(), 1);
            let snapshot: PipelineSnapshot = serde_json::from_str(&histories[0].content).unwrap();
            assert_eq!(snapshot.status, STATUS_ERROR);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn recording_failure_degrades_status_and_surfaces_error() {
        let flaky = Arc::new(FlakyRepository::new().await);
        let h = harness_with(flaky.clone(), Script::Succeed, 20).await;
        h.orchestrator.save_pipeline("u1", E2E).await.unwrap();

        // let start() write its log row, then break the log store for the executor's report
        flaky.allowed_log_writes.store(1, Ordering::SeqCst);
        flaky.fail_history_logs.store(true, Ordering::SeqCst);
        let err = h.orchestrator.run("1", None).await.unwrap_err();
        assert!(format!("{:#}", err).contains("history log store unavailable"));

        let pipeline = h.repository.get_pipeline("1").await.unwrap().unwrap();
        assert_eq!(pipeline.status.as_deref(), Some(STATUS_ERROR));
        assert!(h.orchestrator.tracker().is_empty());

        let histories = h.repository.list_histories("1").await.unwrap();
        assert_eq!(histories.len(), 1);
        assert_eq!(pipeline.last_history_time, Some(histories[0].created_at));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_history_start_marks_pipeline_errored() {
        let flaky = Arc::new(FlakyRepository::new().await);
        let h = harness_with(flaky.clone(), Script::Succeed, 20).await;
        h.orchestrator.save_pipeline("u1", E2E).await.unwrap();

        flaky.allowed_log_writes.store(0, Ordering::SeqCst);
        flaky.fail_history_logs.store(true, Ordering::SeqCst);
        let err = h.orchestrator.run("1", None).await.unwrap_err();
        assert!(format!("{:#}", err).contains("history log store unavailable"));

        let pipeline = h.repository.get_pipeline("1").await.unwrap().unwrap();
        assert_ne!(pipeline.status.as_deref(), Some(STATUS_RUNNING));
        assert_eq!(pipeline.status.as_deref(), Some(STATUS_ERROR));
        assert!(h.factory.seen_running.lock().unwrap().is_empty());
        assert!(h.orchestrator.tracker().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resaving_keeps_the_status_of_earlier_runs() {
        let h = harness(Script::Succeed).await;
        h.orchestrator.save_pipeline("u1", E2E).await.unwrap();
        h.orchestrator.run("1", Some("t1")).await.unwrap();
        let before = h.repository.get_pipeline("1").await.unwrap().unwrap();

        let resaved = h
            .orchestrator
            .save_pipeline("u1", &E2E.replace("every five", "renamed"))
            .await
            .unwrap();
        assert_eq!(resaved.title, "renamed");
        assert_eq!(resaved.status.as_deref(), Some(STATUS_SUCCESS));

        let after = h.repository.get_pipeline("1").await.unwrap().unwrap();
        assert_eq!(after.status.as_deref(), Some(STATUS_SUCCESS));
        assert_eq!(after.last_history_time, before.last_history_time);
        assert_eq!(after.created_at, before.created_at);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reload_pages_enabled_pipelines_and_skips_disabled() {
        let repository: Arc<dyn PipelineRepository> = Arc::new(SqliteRepository::in_memory().await.unwrap());
        let seed = harness_with(Arc::clone(&repository), Script::Succeed, 2).await;
        for i in 0..5 {
            let disabled = i == 3;
            let content = format!(
                r#"{{ "id": "p{i}", "disabled": {disabled}, "stages": [{{ "id": "s" }}],
                     "triggers": [{{ "id": "a", "props": {{ "cron": "0 * * * *" }} }},
                                  {{ "id": "b", "props": {{ "cron": "30 * * * *" }} }},
                                  {{ "id": "m", "props": {{}} }}] }}"#
            );
            seed.orchestrator.save_pipeline("u1", &content).await.unwrap();
        }

        // a fresh process: empty cron registry, same storage
        let h = harness_with(repository, Script::Succeed, 2).await;
        assert_eq!(h.orchestrator.cron().size().await, 0);

        let registered = h.orchestrator.reload_triggers().await.unwrap();
        assert_eq!(registered, 8);
        assert_eq!(h.orchestrator.cron().size().await, 8);
        assert!(h.orchestrator.cron().names_with_prefix("pipeline.p3.").await.is_empty());
        assert!(h.orchestrator.cron().contains("pipeline.p4.trigger.b").await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn disabling_a_pipeline_drops_its_timers() {
        let h = harness(Script::Succeed).await;
        h.orchestrator.save_pipeline("u1", E2E).await.unwrap();
        assert_eq!(h.orchestrator.cron().size().await, 1);

        let disabled = E2E.replacen("\"id\": 1,", "\"id\": 1, \"disabled\": true,", 1);
        let entity = h.orchestrator.save_pipeline("u1", &disabled).await.unwrap();
        assert!(entity.disabled);
        assert_eq!(h.orchestrator.cron().size().await, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_removes_exactly_the_pipeline_timers() {
        let h = harness(Script::Succeed).await;
        h.orchestrator
            .save_pipeline(
                "u1",
                r#"{ "id": 7, "stages": [{ "id": "s" }], "triggers": [
                    { "id": "x", "props": { "cron": "0 1 * * *" } },
                    { "id": "y", "props": { "cron": "0 2 * * *" } }
                ] }"#,
            )
            .await
            .unwrap();
        h.orchestrator.save_pipeline("u1", E2E).await.unwrap();
        assert_eq!(h.orchestrator.cron().size().await, 3);

        assert!(h.orchestrator.delete_pipeline("7").await.unwrap());
        assert_eq!(h.orchestrator.cron().size().await, 1);
        assert!(!h.orchestrator.cron().contains("pipeline.7.trigger.x").await);
        assert!(!h.orchestrator.cron().contains("pipeline.7.trigger.y").await);
        assert!(h.orchestrator.cron().contains("pipeline.1.trigger.t1").await);
        assert!(h.orchestrator.get_pipeline("7").await.unwrap().is_none());
        assert!(!h.orchestrator.delete_pipeline("7").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fire_once_registers_a_one_shot_timer() {
        let h = harness(Script::Succeed).await;
        h.orchestrator.save_pipeline("u1", E2E).await.unwrap();

        h.orchestrator.fire_once("1").await.unwrap();
        h.orchestrator.fire_once("1").await.unwrap();
        assert!(h.orchestrator.cron().contains("pipeline.1.trigger-once").await);
        assert_eq!(h.orchestrator.cron().size().await, 2);

        assert!(h.orchestrator.fire_once("nope").await.is_err());
    }
}
