use std::sync::Arc;

use anyhow::{bail, Context, Result};
use cfcat_storage::{DatabaseConfig, PgCatalogStore};
use cfcat_sync::{SyncConfig, SyncPipeline, SyncScheduler};
use cfcat_web::WebConfig;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "cfcat")]
#[command(about = "Codeforces problem catalog: ingestion, scheduling and queries")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch the problemset once and reconcile it into the catalog.
    Sync,
    /// Sync now, then again every update interval until Ctrl-C.
    Daemon,
    /// Create the catalog tables if they are missing.
    InitDb,
    /// Print the database server version.
    CheckDb,
    /// Serve the read-only query API.
    Serve {
        /// Also run the periodic updater in this process.
        #[arg(long)]
        with_sync: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing `.env` is fine; real environment variables always win.
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let summary = cfcat_sync::run_sync_once_from_env().await?;
            let report = summary.report.unwrap_or_default();
            println!(
                "sync {:?}: run_id={} created={} updated={} skipped={}",
                summary.status, summary.run_id, report.created, report.updated, report.skipped
            );
            if let Some(err) = summary.error {
                bail!("sync failed: {err}");
            }
        }
        Commands::Daemon => cfcat_sync::run_daemon_from_env().await?,
        Commands::InitDb => {
            let store = cfcat_sync::connect_store(&DatabaseConfig::from_env()).await?;
            store.close().await;
            println!("catalog schema ready");
        }
        Commands::CheckDb => {
            let config = DatabaseConfig::from_env();
            let store = PgCatalogStore::connect(&config)
                .await
                .with_context(|| format!("connecting to {}", config.redacted_url()))?;
            let version = store.check_connection().await?;
            store.close().await;
            println!("connected: {version}");
        }
        Commands::Serve { with_sync } => serve(with_sync).await?,
    }

    Ok(())
}

async fn serve(with_sync: bool) -> Result<()> {
    let config = SyncConfig::from_env();
    let store = cfcat_sync::connect_store(&config.database).await?;

    let mut scheduler = None;
    if with_sync {
        let source = cfcat_adapters::source_for(&config.source)?;
        let pipeline = Arc::new(SyncPipeline::new(source, Arc::new(store.clone())));
        let mut sched = SyncScheduler::new(pipeline, config.update_interval);
        sched.start().await?;
        scheduler = Some(sched);
    }

    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
        }
    };
    let served = cfcat_web::serve(Arc::new(store.clone()), WebConfig::from_env(), shutdown).await;

    if let Some(mut sched) = scheduler {
        sched.shutdown().await?;
    }
    store.close().await;
    served
}
