//! Tickload - minute-bar ingestion tool

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tickload_common::logging::{init_logging, LogConfig, LogLevel};
use tracing::{error, info};

use tickload::config::Config;
use tickload::dedup::{DedupStore, MemoryDedupStore, RedisDedupStore};
use tickload::parser::ParserRegistry;
use tickload::sink::{MemorySink, PostgresSink, RowSink};
use tickload::IngestionCoordinator;

#[derive(Parser, Debug)]
#[command(name = "tickload")]
#[command(author, version, about = "Load per-day minute-bar files into TimescaleDB")]
struct Cli {
    /// Directory containing the input files (overrides DATA_DIRECTORY)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Number of workers (overrides MAX_THREADS and enables multithreading)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Keep running and rescan the directory periodically
    #[arg(long)]
    watch: bool,

    /// Parse files without touching Redis or the database
    #[arg(long)]
    dry_run: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("tickload")
        .filter_directives("sqlx=warn")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {:#}", e);
            return ExitCode::FAILURE;
        },
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Ingestion aborted: {:#}", e);
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load()?;

    if let Some(dir) = cli.data_dir {
        config.ingest.data_directory = dir;
    }
    if let Some(workers) = cli.workers {
        config.ingest.max_workers = workers;
        config.ingest.multithreading = workers > 1;
    }
    config.validate()?;

    let workers = config.ingest.worker_count();
    let pool_size = config.ingest.pool_size();
    info!(
        data_directory = %config.ingest.data_directory.display(),
        table = %config.database.table_name,
        workers,
        pool_size,
        dry_run = cli.dry_run,
        "Configuration loaded"
    );

    let dedup: Arc<dyn DedupStore>;
    let sink: Arc<dyn RowSink>;
    if cli.dry_run {
        dedup = Arc::new(MemoryDedupStore::new());
        sink = Arc::new(MemorySink::new());
    } else {
        dedup = Arc::new(RedisDedupStore::connect(&config.redis, pool_size).await?);
        sink = Arc::new(PostgresSink::connect(&config.database, pool_size).await?);
    }

    let coordinator =
        IngestionCoordinator::new(&config.ingest, dedup, sink, ParserRegistry::with_defaults());

    let summary = if cli.watch {
        let interval = Duration::from_secs(config.ingest.watch_interval_secs);
        info!(interval_secs = interval.as_secs(), "Watching data directory");
        coordinator.run_watch(interval, shutdown_signal()).await?
    } else {
        coordinator.run().await?
    };

    summary.log();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}
