//! Periodic driver for [`SyncPipeline`] backed by `tokio-cron-scheduler`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{SyncPipeline, SyncRunSummary};

pub struct SyncScheduler {
    pipeline: Arc<SyncPipeline>,
    interval: Duration,
    run_guard: Arc<Mutex<()>>,
    inner: Option<JobScheduler>,
    job_id: Option<Uuid>,
}

impl SyncScheduler {
    pub fn new(pipeline: Arc<SyncPipeline>, interval: Duration) -> Self {
        Self {
            pipeline,
            interval,
            run_guard: Arc::new(Mutex::new(())),
            inner: None,
            job_id: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.inner.is_some()
    }

    /// Runs one sync immediately, then registers the repeating job.
    ///
    /// Calling `start` again replaces the existing job instead of adding a second one.
    pub async fn start(&mut self) -> Result<()> {
        if let Some(summary) = run_tick(&self.pipeline, &self.run_guard).await {
            info!(run_id = %summary.run_id, status = ?summary.status, "initial sync finished");
        }

        if self.inner.is_none() {
            let sched = JobScheduler::new().await.context("creating scheduler")?;
            sched.start().await.context("starting scheduler")?;
            self.inner = Some(sched);
        }
        let Some(sched) = self.inner.as_ref() else {
            return Ok(());
        };

        if let Some(old) = self.job_id.take() {
            sched.remove(&old).await.context("removing previous sync job")?;
        }

        let pipeline = Arc::clone(&self.pipeline);
        let guard = Arc::clone(&self.run_guard);
        let job = Job::new_repeated_async(self.interval, move |_uuid, _l| {
            let pipeline = Arc::clone(&pipeline);
            let guard = Arc::clone(&guard);
            Box::pin(async move {
                run_tick(&pipeline, &guard).await;
            })
        })
        .context("creating sync job")?;
        let job_id = sched.add(job).await.context("adding sync job")?;
        self.job_id = Some(job_id);

        info!(interval_secs = self.interval.as_secs(), %job_id, "sync job scheduled");
        Ok(())
    }

    /// Stops the periodic job. A no-op when not running.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.job_id = None;
        if let Some(mut sched) = self.inner.take() {
            sched.shutdown().await.context("shutting down scheduler")?;
            info!("sync scheduler stopped");
        }
        Ok(())
    }
}

/// `None` when another run still holds the guard.
async fn run_tick(pipeline: &SyncPipeline, guard: &Mutex<()>) -> Option<SyncRunSummary> {
    let Ok(_held) = guard.try_lock() else {
        warn!("previous sync still running; skipping this tick");
        return None;
    };
    Some(pipeline.run_once().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{scenario_snapshot, StaticSource};
    use cfcat_storage::{CatalogStore, MemoryCatalogStore};

    fn pipeline_with(source: Arc<StaticSource>, store: &MemoryCatalogStore) -> Arc<SyncPipeline> {
        Arc::new(SyncPipeline::new(source, Arc::new(store.clone())))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn start_runs_initial_sync_before_returning() {
        let store = MemoryCatalogStore::new();
        let source = Arc::new(StaticSource::new(scenario_snapshot()));
        let mut scheduler = SyncScheduler::new(pipeline_with(source.clone(), &store), Duration::from_secs(3600));

        scheduler.start().await.expect("start");
        assert!(scheduler.is_running());
        assert_eq!(source.fetches(), 1);
        assert_eq!(store.stats().await.expect("stats").problems, 2);

        scheduler.shutdown().await.expect("shutdown");
        assert!(!scheduler.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_is_idempotent_and_safe_before_start() {
        let store = MemoryCatalogStore::new();
        let source = Arc::new(StaticSource::new(scenario_snapshot()));
        let mut scheduler = SyncScheduler::new(pipeline_with(source, &store), Duration::from_secs(3600));

        scheduler.shutdown().await.expect("shutdown before start");
        scheduler.start().await.expect("start");
        scheduler.shutdown().await.expect("first shutdown");
        scheduler.shutdown().await.expect("second shutdown");
        assert!(!scheduler.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn restart_replaces_job_and_reruns_initial_sync() {
        let store = MemoryCatalogStore::new();
        let source = Arc::new(StaticSource::new(scenario_snapshot()));
        let mut scheduler = SyncScheduler::new(pipeline_with(source.clone(), &store), Duration::from_secs(3600));

        scheduler.start().await.expect("start");
        let first_job = scheduler.job_id;
        scheduler.start().await.expect("restart");
        assert_ne!(scheduler.job_id, first_job);
        assert_eq!(source.fetches(), 2);
        assert_eq!(store.stats().await.expect("stats").problems, 2);

        scheduler.shutdown().await.expect("shutdown");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failing_source_does_not_stop_scheduler() {
        let store = MemoryCatalogStore::new();
        let source = Arc::new(StaticSource::failing());
        let mut scheduler = SyncScheduler::new(pipeline_with(source.clone(), &store), Duration::from_secs(3600));

        scheduler.start().await.expect("start");
        assert!(scheduler.is_running());
        assert_eq!(source.fetches(), 1);
        assert_eq!(store.stats().await.expect("stats").problems, 0);

        scheduler.shutdown().await.expect("shutdown");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn repeating_job_fires_after_interval() {
        let store = MemoryCatalogStore::new();
        let source = Arc::new(StaticSource::new(scenario_snapshot()));
        let mut scheduler = SyncScheduler::new(pipeline_with(source.clone(), &store), Duration::from_secs(1));

        scheduler.start().await.expect("start");
        tokio::time::sleep(Duration::from_millis(2600)).await;
        scheduler.shutdown().await.expect("shutdown");

        assert!(source.fetches() >= 2, "fetches = {}", source.fetches());
    }

    #[tokio::test]
    async fn held_guard_skips_tick() {
        let store = MemoryCatalogStore::new();
        let source = Arc::new(StaticSource::new(scenario_snapshot()));
        let pipeline = pipeline_with(source.clone(), &store);
        let guard = Mutex::new(());

        let held = guard.lock().await;
        assert!(run_tick(&pipeline, &guard).await.is_none());
        drop(held);

        assert!(run_tick(&pipeline, &guard).await.is_some());
        assert_eq!(source.fetches(), 1);
    }
}
