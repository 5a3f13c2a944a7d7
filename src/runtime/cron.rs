/// Named timer registry on top of tokio-cron-scheduler
///
/// Keeps a name -> job UUID map so timers can be replaced and removed by the
/// deterministic names the orchestrator derives from pipeline and trigger ids.
/// Knows nothing about pipelines.

use anyhow::{Context, Result};
use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

/// Future returned by a timer job
pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Work executed each time a timer fires
pub type CronJob = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// Registry of named recurring and one-shot timers
pub struct CronRegistry {
    scheduler: RwLock<JobScheduler>,
    /// Timer name -> scheduler job UUID
    timers: Arc<RwLock<HashMap<String, Uuid>>>,
}

impl CronRegistry {
    /// Create a registry with a fresh (not yet started) scheduler
    pub async fn new() -> Result<Self> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler: RwLock::new(scheduler),
            timers: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Start firing registered timers
    pub async fn start(&self) -> Result<()> {
        self.scheduler.read().await.start().await?;
        tracing::info!("⏰ Cron registry started with {} timers", self.size().await);
        Ok(())
    }

    /// Stop the scheduler and forget every timer
    pub async fn shutdown(&self) -> Result<()> {
        self.timers.write().await.clear();
        self.scheduler.write().await.shutdown().await?;
        tracing::info!("⏹️ Cron registry stopped");
        Ok(())
    }

    /// Add or replace the timer called `name`
    ///
    /// With an expression the job recurs on the normalized schedule; without one it
    /// fires once as soon as the scheduler ticks and then drops its own entry. If the
    /// new job cannot be built the previous timer keeps running.
    pub async fn register(&self, name: &str, cron: Option<&str>, job: CronJob) -> Result<()> {
        let new_job = match cron {
            Some(expr) => {
                let schedule = scheduler_expression(&normalize_cron(expr));
                tracing::debug!("⏰ Building recurring timer {} on '{}'", name, schedule);
                Job::new_async(schedule.as_str(), move |_uuid, _l| {
                    let job = Arc::clone(&job);
                    Box::pin(async move { job().await })
                })
                .with_context(|| format!("invalid cron expression '{}' for timer {}", expr, name))?
            }
            None => {
                let timers = Arc::clone(&self.timers);
                let timer_name = name.to_string();
                Job::new_one_shot_async(Duration::ZERO, move |uuid, _l| {
                    let job = Arc::clone(&job);
                    let timers = Arc::clone(&timers);
                    let timer_name = timer_name.clone();
                    Box::pin(async move {
                        {
                            let mut timers = timers.write().await;
                            if timers.get(&timer_name) == Some(&uuid) {
                                timers.remove(&timer_name);
                            }
                        }
                        job().await
                    })
                })?
            }
        };

        // Held across add/remove so a concurrent register of the same name cannot interleave
        let mut timers = self.timers.write().await;
        let scheduler = self.scheduler.read().await;

        let new_uuid = scheduler.add(new_job).await?;

        if let Some(old_uuid) = timers.insert(name.to_string(), new_uuid) {
            if let Err(e) = scheduler.remove(&old_uuid).await {
                tracing::warn!("⚠️ Failed to remove replaced timer {}: {}", name, e);
            } else {
                tracing::debug!("🔁 Replaced timer {}", name);
            }
        }

        tracing::info!("🔥 Registered timer {} ({})", name, cron.unwrap_or("once"));
        Ok(())
    }

    /// Remove the timer called `name`; absent names are ignored
    pub async fn remove(&self, name: &str) -> bool {
        let removed = self.timers.write().await.remove(name);

        match removed {
            Some(uuid) => {
                if let Err(e) = self.scheduler.read().await.remove(&uuid).await {
                    tracing::warn!("⚠️ Failed to remove timer {} from scheduler: {}", name, e);
                }
                tracing::info!("🗑️ Removed timer {}", name);
                true
            }
            None => false,
        }
    }

    /// Number of live timers
    pub async fn size(&self) -> usize {
        self.timers.read().await.len()
    }

    /// Whether a timer with this name exists
    pub async fn contains(&self, name: &str) -> bool {
        self.timers.read().await.contains_key(name)
    }

    /// Names of live timers starting with `prefix`, sorted
    pub async fn names_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .timers
            .read()
            .await
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect();
        names.sort();
        names
    }
}

/// Clamp a wildcard leading field to `0`
///
/// `* 5 * * *` becomes `0 5 * * *`; every other field is left untouched.
pub fn normalize_cron(expr: &str) -> String {
    let mut fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.first() == Some(&"*") {
        fields[0] = "0";
    }
    fields.join(" ")
}

/// The scheduler wants a seconds field, so five-field expressions get one
fn scheduler_expression(normalized: &str) -> String {
    if normalized.split_whitespace().count() == 5 {
        format!("0 {}", normalized)
    } else {
        normalized.to_string()
    }
}
