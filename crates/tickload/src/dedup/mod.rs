//! Deduplication store
//!
//! Records which files have been fully loaded. The pipeline checks a key
//! before doing any work and marks it only after the sink committed, so the
//! mark is the gate for "never load twice".
//!
//! No compare-and-set is required: the work queue hands each file of a run to
//! exactly one worker, so two workers never race on the same key within one
//! process. Two processes loading the same directory at the same moment can
//! still both pass the check; the sink's conflict handling absorbs that.

pub mod memory;
pub mod redis_store;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::DedupKey;

pub use self::memory::MemoryDedupStore;
pub use self::redis_store::{RedisConnector, RedisDedupStore};

/// Key-existence service used for file-level deduplication
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Has this key been marked processed?
    ///
    /// Errors are [`IngestError::StoreUnavailable`](crate::error::IngestError::StoreUnavailable).
    async fn is_processed(&self, key: &DedupKey) -> Result<bool>;

    /// Record the key as processed. Idempotent.
    async fn mark_processed(&self, key: &DedupKey) -> Result<()>;

    /// Round-trip used at startup to fail fast when the store is down.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
