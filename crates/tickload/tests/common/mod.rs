//! Shared fixtures for tickload integration tests
//!
//! - data directory builders writing realistic minute-bar files
//! - `IngestConfig` for a temp directory
//! - PostgreSQL and Redis containers for the store-backed tests

#![allow(dead_code)]

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::{postgres::Postgres, redis::Redis};
use tickload::config::{Config, DatabaseConfig, IngestConfig, RedisConfig};
use tracing::info;

pub const HEADER: &str =
    "Time,Open,High,Low,Close,Volume_(BTC),Volume_(Currency),Weighted_Price";

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tickload=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// CSV contents with `minutes` consecutive bars starting at midnight.
pub fn bars_csv(minutes: u32) -> String {
    let mut out = String::from(HEADER);
    out.push('\n');
    for m in 0..minutes {
        let price = 42_000.0 + f64::from(m);
        out.push_str(&format!(
            "{:02}:{:02}:00,{},{},{},{},1.25,{},{}\n",
            m / 60,
            m % 60,
            price,
            price + 5.0,
            price - 5.0,
            price + 1.0,
            price * 1.25,
            price
        ));
    }
    out
}

/// Write `<name>` with `minutes` bars into `dir`.
pub fn write_day(dir: &Path, name: &str, minutes: u32) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bars_csv(minutes)).expect("write fixture");
    path
}

pub fn write_raw(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("write fixture");
    path
}

/// Day file names `2024-01-01.csv` onwards.
pub fn day_names(count: u32) -> Vec<String> {
    (0..count)
        .map(|i| {
            let date = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date")
                + chrono::Days::new(u64::from(i));
            format!("{}.csv", date.format("%Y-%m-%d"))
        })
        .collect()
}

pub fn settings(dir: &Path, workers: usize) -> IngestConfig {
    IngestConfig {
        data_directory: dir.to_path_buf(),
        multithreading: workers > 1,
        max_workers: workers,
        ..IngestConfig::default()
    }
}

// ============================================================================
// Containers
// ============================================================================

pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pub config: DatabaseConfig,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container.get_host().await?;
        let port = container.get_host_port_ipv4(5432.tcp()).await?;

        let mut config = Config::default().database;
        config.url = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);
        // Plain PostgreSQL image, no TimescaleDB extension
        config.create_hypertable = false;

        Ok(Self {
            _container: container,
            config,
        })
    }
}

pub struct TestRedis {
    _container: ContainerAsync<Redis>,
    pub config: RedisConfig,
}

impl TestRedis {
    pub async fn start() -> Result<Self> {
        info!("Starting Redis test container...");

        let container = Redis::default()
            .with_tag("7-alpine")
            .start()
            .await
            .context("Failed to start Redis container")?;

        let host = container.get_host().await?;
        let port = container.get_host_port_ipv4(6379.tcp()).await?;

        let mut config = Config::default().redis;
        config.host = host.to_string();
        config.port = port;

        Ok(Self {
            _container: container,
            config,
        })
    }
}
