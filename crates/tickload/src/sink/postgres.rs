//! PostgreSQL / TimescaleDB sink
//!
//! Rows go to a single table keyed by `date_time`. Each batch is written in
//! chunks of multi-row `INSERT`s inside one transaction, with
//! `ON CONFLICT (date_time) DO NOTHING` so a file that was loaded but never
//! marked can be loaded again without duplicating rows.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::RowSink;
use crate::config::{is_valid_identifier, DatabaseConfig};
use crate::error::{IngestError, Result};
use crate::models::{MinuteBar, RowBatch};
use crate::pool::ConnectionKind;

/// Postgres allows at most 65535 bind parameters per statement.
const COLUMNS_PER_ROW: usize = 8;
const MAX_BIND_PARAMS: usize = 65_535;

/// Create the connection pool used by [`PostgresSink`].
///
/// `max_connections` is the sink pool size; `acquire` on a saturated pool
/// waits up to the configured timeout.
pub async fn create_pool(config: &DatabaseConfig, pool_size: usize) -> Result<PgPool> {
    let max_connections = u32::try_from(pool_size).unwrap_or(u32::MAX);

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect(&config.url)
        .await
        .map_err(|e| IngestError::PoolInit {
            kind: ConnectionKind::Sink.to_string(),
            message: e.to_string(),
        })?;

    info!(max_connections, "Database connection pool created");

    Ok(pool)
}

pub struct PostgresSink {
    pool: PgPool,
    table: String,
    chunk_size: usize,
    create_hypertable: bool,
}

impl PostgresSink {
    pub fn new(pool: PgPool, config: &DatabaseConfig) -> Result<Self> {
        if !is_valid_identifier(&config.table_name) {
            return Err(IngestError::Config(format!(
                "invalid table name '{}'",
                config.table_name
            )));
        }

        let max_chunk = MAX_BIND_PARAMS / COLUMNS_PER_ROW;
        Ok(Self {
            pool,
            table: config.table_name.clone(),
            chunk_size: config.insert_chunk_size.clamp(1, max_chunk),
            create_hypertable: config.create_hypertable,
        })
    }

    /// Pool, sink and schema in one step.
    pub async fn connect(config: &DatabaseConfig, pool_size: usize) -> Result<Self> {
        let pool = create_pool(config, pool_size).await?;
        let sink = Self::new(pool, config)?;
        sink.initialize().await.map_err(|e| IngestError::PoolInit {
            kind: ConnectionKind::Sink.to_string(),
            message: e.to_string(),
        })?;
        Ok(sink)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn create_table_sql(&self) -> String {
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                date_time TIMESTAMPTZ NOT NULL PRIMARY KEY,
                open_price FLOAT,
                high_price FLOAT,
                low_price FLOAT,
                close_price FLOAT,
                volume_btc FLOAT,
                volume_currency FLOAT,
                weighted_price FLOAT
            )
            "#,
            self.table
        )
    }

    fn hypertable_sql(&self) -> String {
        format!(
            "SELECT create_hypertable('{}', 'date_time', if_not_exists => TRUE, migrate_data => TRUE)",
            self.table
        )
    }

    fn insert_prefix(&self) -> String {
        format!(
            "INSERT INTO {} (date_time, open_price, high_price, low_price, close_price, \
             volume_btc, volume_currency, weighted_price) ",
            self.table
        )
    }

    async fn insert_chunk(
        &self,
        tx: &mut sqlx::Transaction<'_, Postgres>,
        rows: &[MinuteBar],
    ) -> Result<u64> {
        let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(self.insert_prefix());

        query_builder.push_values(rows.iter(), |mut b, row| {
            b.push_bind(row.date_time)
                .push_bind(row.open_price)
                .push_bind(row.high_price)
                .push_bind(row.low_price)
                .push_bind(row.close_price)
                .push_bind(row.volume_btc)
                .push_bind(row.volume_currency)
                .push_bind(row.weighted_price);
        });
        query_builder.push(" ON CONFLICT (date_time) DO NOTHING");

        let result = query_builder.build().execute(&mut **tx).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RowSink for PostgresSink {
    async fn initialize(&self) -> Result<()> {
        sqlx::query(&self.create_table_sql())
            .execute(&self.pool)
            .await?;

        if self.create_hypertable {
            // Plain PostgreSQL without the extension still works as a sink.
            if let Err(e) = sqlx::query(&self.hypertable_sql()).execute(&self.pool).await {
                warn!(table = %self.table, error = %e, "Could not create hypertable");
            }
        }

        info!(table = %self.table, "Sink table ready");
        Ok(())
    }

    async fn insert_batch(&self, batch: &RowBatch) -> Result<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;

        for chunk in batch.rows.chunks(self.chunk_size) {
            written += self.insert_chunk(&mut tx, chunk).await?;
        }

        tx.commit().await?;

        debug!(
            file = %batch.source_file,
            rows = batch.len(),
            written,
            "Committed batch"
        );
        Ok(written)
    }
}
