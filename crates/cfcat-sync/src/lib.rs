//! Sync pipeline: fetch a problemset snapshot, reconcile it into the catalog, repeat on a timer.

pub mod reconcile;
pub mod scheduler;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cfcat_adapters::{source_for, SnapshotSource, SourceSettings, CODEFORCES_PROBLEMSET_URL};
use cfcat_storage::{CatalogStore, DatabaseConfig, HttpClientConfig, PgCatalogStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

pub use reconcile::{EntryError, ReconcileReport, Reconciler};
pub use scheduler::SyncScheduler;

pub const CRATE_NAME: &str = "cfcat-sync";
pub const DEFAULT_UPDATE_INTERVAL_HOURS: u64 = 1;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database: DatabaseConfig,
    pub source: SourceSettings,
    pub update_interval: Duration,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = HttpClientConfig::default();
        let http = HttpClientConfig {
            timeout: lookup("CFCAT_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            user_agent: lookup("CFCAT_USER_AGENT").unwrap_or(defaults.user_agent),
        };
        let hours = lookup("CFCAT_UPDATE_INTERVAL_HOURS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|h| *h > 0)
            .unwrap_or(DEFAULT_UPDATE_INTERVAL_HOURS);

        Self {
            database: DatabaseConfig::from_lookup(&lookup),
            source: SourceSettings {
                api_url: lookup("CODEFORCES_API_URL")
                    .unwrap_or_else(|| CODEFORCES_PROBLEMSET_URL.to_string()),
                fixture_path: lookup("CFCAT_FIXTURE_PATH")
                    .filter(|p| !p.trim().is_empty())
                    .map(PathBuf::from),
                http,
            },
            update_interval: Duration::from_secs(hours * 3600),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Succeeded,
    FetchFailed,
    ReconcileFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub source_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: SyncStatus,
    pub report: Option<ReconcileReport>,
    pub error: Option<String>,
}

impl SyncRunSummary {
    pub fn succeeded(&self) -> bool {
        self.status == SyncStatus::Succeeded
    }
}

/// One fetch plus one reconciliation. Failures are reported in the summary, never raised.
pub struct SyncPipeline {
    source: Arc<dyn SnapshotSource>,
    reconciler: Reconciler,
}

impl SyncPipeline {
    pub fn new(source: Arc<dyn SnapshotSource>, store: Arc<dyn CatalogStore>) -> Self {
        Self {
            source,
            reconciler: Reconciler::new(store),
        }
    }

    pub fn source(&self) -> &Arc<dyn SnapshotSource> {
        &self.source
    }

    pub fn store(&self) -> &Arc<dyn CatalogStore> {
        self.reconciler.store()
    }

    pub async fn run_once(&self) -> SyncRunSummary {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", %run_id, source = self.source.source_id());
        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid) -> SyncRunSummary {
        let started_at = Utc::now();
        info!("starting problemset sync");

        let (status, report, error) = match self.source.fetch().await {
            Err(err) => {
                error!(error = %err, "problemset fetch failed; catalog left untouched");
                (SyncStatus::FetchFailed, None, Some(err.to_string()))
            }
            Ok(snapshot) => {
                info!(
                    problems = snapshot.problems.len(),
                    statistics = snapshot.statistics.len(),
                    "fetched problemset snapshot"
                );
                match self.reconciler.reconcile(&snapshot).await {
                    Ok(report) => (SyncStatus::Succeeded, Some(report), None),
                    Err(err) => {
                        error!(error = %err, "reconciliation failed; batch rolled back");
                        (SyncStatus::ReconcileFailed, None, Some(err.to_string()))
                    }
                }
            }
        };

        let summary = SyncRunSummary {
            run_id,
            source_id: self.source.source_id().to_string(),
            started_at,
            finished_at: Utc::now(),
            status,
            report,
            error,
        };
        info!(status = ?summary.status, "sync run finished");
        summary
    }
}

/// Connects with the configured pool and makes sure the catalog tables exist.
pub async fn connect_store(config: &DatabaseConfig) -> Result<PgCatalogStore> {
    info!(database = %config.redacted_url(), "connecting to catalog database");
    let store = PgCatalogStore::connect(config)
        .await
        .context("connecting to catalog database")?;
    store.ensure_schema().await.context("creating catalog schema")?;
    Ok(store)
}

pub async fn run_sync_once_from_env() -> Result<SyncRunSummary> {
    let config = SyncConfig::from_env();
    let store = connect_store(&config.database).await?;
    let source = source_for(&config.source)?;
    let pipeline = SyncPipeline::new(source, Arc::new(store.clone()));
    let summary = pipeline.run_once().await;
    store.close().await;
    Ok(summary)
}

/// Runs the periodic updater until Ctrl-C.
pub async fn run_daemon_from_env() -> Result<()> {
    let config = SyncConfig::from_env();
    let store = connect_store(&config.database).await?;
    let source = source_for(&config.source)?;
    let pipeline = Arc::new(SyncPipeline::new(source, Arc::new(store.clone())));

    let mut scheduler = SyncScheduler::new(pipeline, config.update_interval);
    scheduler.start().await?;
    info!(
        interval_hours = config.update_interval.as_secs() / 3600,
        "periodic updater running; press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutdown requested");
    scheduler.shutdown().await?;
    store.close().await;
    Ok(())
}
