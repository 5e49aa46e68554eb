mod api;
mod config;
mod db;
mod errors;
mod ingest;
mod jobs;
mod store;
mod system;
#[cfg(test)]
mod test_support;
mod youtube;

use anyhow::Context;
use axum_prometheus::PrometheusMetricLayer;
use clap::{Args, Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::api::create_api_router;
use crate::config::{PaginationSettings, Settings};
use crate::db::init_db;
use crate::ingest::{CancelFlag, IngestService, RetentionSweeper};
use crate::jobs::{spawn_recurring, JobManager, RetryPolicy, Schedule};
use crate::store::VideoStore;
use crate::youtube::YoutubeSearchClient;

#[derive(Clone)]
pub struct InnerState {
    pub store: Arc<dyn VideoStore>,
    pub jobs: JobManager,
    pub pagination: PaginationSettings,
    pub default_query: String,
    pub default_max_results: u32,
    pub retention: Duration,
}

#[derive(Parser, Debug)]
#[command(name = "yt-video-ingest", version, about = "Ingest and serve the latest YouTube videos for a query")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API and the recurring jobs (default when no command supplied)
    Serve,
    /// Run one ingestion in the foreground and print its summary
    Fetch(FetchArgs),
    /// Delete videos older than the retention age and print the count
    Sweep {
        /// Overrides RETENTION_DAYS
        #[arg(long)]
        max_age_days: Option<u64>,
    },
}

#[derive(Debug, Args)]
struct FetchArgs {
    /// Search query, defaults to DEFAULT_QUERY
    #[arg(long)]
    query: Option<String>,
    /// Results to request, defaults to DEFAULT_MAX_RESULTS
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=50))]
    max_results: Option<u32>,
    /// Process records one at a time instead of fanning out
    #[arg(long)]
    sequential: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "yt_video_ingest=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env().context("Failed to load settings")?;

    let store = init_db(&settings.database, settings.pagination.max_page_size)
        .await
        .context("Failed to initialize the video store")?;
    let client = YoutubeSearchClient::new(&settings.youtube).context("Failed to build the search client")?;
    let ingest = Arc::new(IngestService::new(Arc::new(client), store.clone(), &settings.ingest));
    let sweeper = RetentionSweeper::new(store.clone());

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(settings, store, ingest, sweeper).await,
        Command::Fetch(args) => fetch(&settings, &ingest, args).await,
        Command::Sweep { max_age_days } => {
            let max_age = max_age_days
                .map(|days| Duration::from_secs(days.saturating_mul(24 * 60 * 60)))
                .unwrap_or(settings.scheduler.retention);
            let summary = sweeper.sweep(max_age).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
    }
}

async fn fetch(settings: &Settings, ingest: &IngestService, args: FetchArgs) -> anyhow::Result<()> {
    let query = args.query.unwrap_or_else(|| settings.ingest.default_query.clone());
    let max_results = args.max_results.unwrap_or(settings.ingest.default_max_results);

    let cancel = CancelFlag::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing in-flight records");
            on_interrupt.cancel();
        }
    });

    let summary = if args.sequential {
        ingest.ingest_sequential(&query, max_results, &cancel).await?
    } else {
        ingest.ingest(&query, max_results, &cancel).await?
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn serve(
    settings: Settings,
    store: Arc<dyn VideoStore>,
    ingest: Arc<IngestService>,
    sweeper: RetentionSweeper,
) -> anyhow::Result<()> {
    let jobs = JobManager::new(
        ingest,
        sweeper,
        settings.scheduler.max_concurrent_jobs,
        RetryPolicy {
            max_retries: settings.ingest.fetch_retries,
            base_delay: settings.ingest.retry_base,
        },
        settings.scheduler.job_history_limit,
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let recurring = spawn_recurring(
        jobs.clone(),
        Schedule {
            ingest_every: settings.scheduler.ingest_interval,
            sweep_every: settings.scheduler.sweep_interval,
            query: settings.ingest.default_query.clone(),
            max_results: settings.ingest.default_max_results,
            retention: settings.scheduler.retention,
        },
        shutdown_rx,
    );

    let app_state = InnerState {
        store,
        jobs,
        pagination: settings.pagination.clone(),
        default_query: settings.ingest.default_query.clone(),
        default_max_results: settings.ingest.default_max_results,
        retention: settings.scheduler.retention,
    };
    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
    let app = create_api_router(app_state, prometheus_layer, metric_handle);

    let listener = tokio::net::TcpListener::bind(&settings.http_addr)
        .await
        .with_context(|| format!("Could not bind {}", settings.http_addr))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .context("HTTP server failed")?;

    if let Err(e) = recurring.await {
        tracing::error!(error = %e, "Recurring job loop ended abnormally");
    }
    Ok(())
}

async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
