//! FIPE Ingest - vehicle price catalog crawler

use anyhow::{Context, Result};
use clap::Parser;
use fipe_common::logging::{init_logging, LogConfig, LogLevel};
use fipe_ingest::config::{
    CatalogConfig, IngestConfig, PipelineConfig, RetryConfig, VehicleKind, DEFAULT_BASE_URL,
    DEFAULT_CHUNK_SIZE, DEFAULT_QUEUE_CAPACITY, DEFAULT_USER_AGENT,
};
use fipe_ingest::db::{create_pool, DatabaseConfig};
use fipe_ingest::export::{DryRunSink, ExportSink, PgSink};
use fipe_ingest::{Orchestrator, RunSummary};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "fipe-ingest")]
#[command(author, version, about = "FIPE vehicle catalog crawler")]
struct Cli {
    /// Brands crawled concurrently per chunk
    #[arg(long, env = "FIPE_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Maximum detail records per brand (negative for no limit)
    #[arg(long, env = "FIPE_LIMIT", default_value_t = -1, allow_hyphen_values = true)]
    limit: i64,

    /// Catalog API root
    #[arg(long, env = "FIPE_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Vehicle catalog to crawl
    #[arg(long, env = "FIPE_VEHICLE", value_enum, default_value_t = VehicleKind::Carros)]
    vehicle: VehicleKind,

    /// Attempts per request
    #[arg(long, env = "FIPE_MAX_RETRIES", default_value_t = 5)]
    max_retries: u32,

    /// Initial backoff in seconds
    #[arg(long, env = "FIPE_BASE_DELAY", default_value = "5", value_parser = parse_seconds)]
    base_delay: Duration,

    /// Backoff cap in seconds
    #[arg(long, env = "FIPE_MAX_DELAY", default_value = "20", value_parser = parse_seconds)]
    max_delay: Duration,

    /// Upper bound of the random delay added to each backoff, in seconds
    #[arg(long, env = "FIPE_JITTER", default_value = "2", value_parser = parse_seconds)]
    jitter: Duration,

    /// Per-attempt request timeout in seconds
    #[arg(long, env = "FIPE_REQUEST_TIMEOUT", default_value = "30", value_parser = parse_seconds)]
    request_timeout: Duration,

    /// Capacity of the models and years queues
    #[arg(long, env = "FIPE_QUEUE_CAPACITY", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// Abort a brand pipeline after this many seconds
    #[arg(long, env = "FIPE_PIPELINE_TIMEOUT", value_parser = parse_seconds)]
    pipeline_timeout: Option<Duration>,

    /// Crawl without writing to the database
    #[arg(long)]
    dry_run: bool,

    /// Stop the run when any table export fails
    #[arg(long, env = "FIPE_FAIL_ON_EXPORT_ERROR")]
    fail_on_export_error: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            catalog: CatalogConfig {
                base_url: self.base_url.clone(),
                vehicle: self.vehicle,
                user_agent: DEFAULT_USER_AGENT.to_string(),
            },
            retry: RetryConfig {
                max_retries: self.max_retries,
                base_delay: self.base_delay,
                max_delay: self.max_delay,
                jitter: self.jitter,
                request_timeout: self.request_timeout,
            },
            pipeline: PipelineConfig {
                limit: PipelineConfig::limit_from_signed(self.limit),
                queue_capacity: self.queue_capacity,
                timeout: self.pipeline_timeout,
            },
            chunk_size: self.chunk_size,
        }
    }
}

fn parse_seconds(value: &str) -> std::result::Result<Duration, String> {
    let secs: f64 = value
        .parse()
        .map_err(|_| format!("'{}' is not a number of seconds", value))?;
    Duration::try_from_secs_f64(secs).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("fipe-ingest")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let config = cli.ingest_config();
    info!(
        base_url = %config.catalog.base_url,
        vehicle = %config.catalog.vehicle,
        chunk_size = config.chunk_size,
        limit = ?config.pipeline.limit,
        "Starting FIPE ingestion"
    );

    let summary = if cli.dry_run {
        crawl(&config, DryRunSink, cli.fail_on_export_error).await?
    } else {
        let db_config = DatabaseConfig::from_env()?;
        let pool = create_pool(&db_config)
            .await
            .context("Failed to connect to database")?;
        let summary = crawl(&config, PgSink::new(pool.clone()), cli.fail_on_export_error).await;
        pool.close().await;
        summary?
    };

    info!(%summary, "Ingestion complete");
    Ok(())
}

async fn crawl<S: ExportSink>(config: &IngestConfig, sink: S, strict: bool) -> Result<RunSummary> {
    let orchestrator = Orchestrator::new(config, sink)?.with_strict_export(strict);

    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling running pipelines");
            cancel.cancel();
        }
    });

    Ok(orchestrator.run().await?)
}
