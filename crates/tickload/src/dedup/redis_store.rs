//! Redis-backed dedup store
//!
//! Each processed file is one key, `<namespace>:<file name>`, holding the
//! RFC 3339 time it was marked. Lookups use `EXISTS`, marks use `SET`.
//! Connections come from a [`LeasePool`] sized like the worker pool.

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisResult};
use std::time::Duration;
use tracing::{debug, info};

use super::DedupStore;
use crate::config::RedisConfig;
use crate::error::{IngestError, Result};
use crate::models::DedupKey;
use crate::pool::{ConnectionKind, Connector, LeasePool};

/// Opens multiplexed async connections to one Redis database
pub struct RedisConnector {
    client: Client,
    connect_timeout: Duration,
}

impl RedisConnector {
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url()).map_err(|e| IngestError::PoolInit {
            kind: ConnectionKind::Dedup.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            client,
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        })
    }
}

#[async_trait]
impl Connector for RedisConnector {
    type Connection = MultiplexedConnection;

    async fn connect(&self) -> Result<MultiplexedConnection> {
        tokio::time::timeout(self.connect_timeout, self.client.get_multiplexed_async_connection())
            .await
            .map_err(|_| {
                IngestError::StoreUnavailable(format!(
                    "connect timed out after {}s",
                    self.connect_timeout.as_secs()
                ))
            })?
            .map_err(IngestError::from)
    }
}

/// Dedup store talking to Redis through pooled leases
#[derive(Clone)]
pub struct RedisDedupStore {
    pool: LeasePool<RedisConnector>,
}

impl RedisDedupStore {
    pub fn new(pool: LeasePool<RedisConnector>) -> Self {
        Self { pool }
    }

    /// Build the pool, open one connection and `PING` it.
    pub async fn connect(config: &RedisConfig, pool_size: usize) -> Result<Self> {
        let connector = RedisConnector::new(config)?;
        let pool = LeasePool::new(ConnectionKind::Dedup, pool_size, connector)?;
        pool.warm_up().await?;

        let store = Self::new(pool);
        store.ping().await.map_err(|e| IngestError::PoolInit {
            kind: store.pool.kind().to_string(),
            message: e.to_string(),
        })?;

        info!(
            host = %config.host,
            port = config.port,
            kind = %store.pool.kind(),
            pool_size = store.pool.size(),
            "Connected to Redis dedup store"
        );
        Ok(store)
    }

    pub fn pool(&self) -> &LeasePool<RedisConnector> {
        &self.pool
    }
}

#[async_trait]
impl DedupStore for RedisDedupStore {
    async fn is_processed(&self, key: &DedupKey) -> Result<bool> {
        let mut lease = self.pool.acquire().await?;
        let exists: RedisResult<bool> = lease.exists(key.as_str()).await;
        match exists {
            Ok(exists) => Ok(exists),
            Err(e) => {
                lease.discard();
                Err(e.into())
            },
        }
    }

    async fn mark_processed(&self, key: &DedupKey) -> Result<()> {
        let mut lease = self.pool.acquire().await?;
        let stored: RedisResult<()> = lease.set(key.as_str(), Utc::now().to_rfc3339()).await;
        match stored {
            Ok(()) => {
                debug!(key = %key, "Marked processed");
                Ok(())
            },
            Err(e) => {
                lease.discard();
                Err(e.into())
            },
        }
    }

    async fn ping(&self) -> Result<()> {
        let mut lease = self.pool.acquire().await?;
        let pong: RedisResult<String> = redis::cmd("PING").query_async(&mut *lease).await;
        match pong {
            Ok(_) => Ok(()),
            Err(e) => {
                lease.discard();
                Err(e.into())
            },
        }
    }
}
