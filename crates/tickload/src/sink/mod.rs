//! Relational sink
//!
//! Destination for parsed batches. One [`RowSink::insert_batch`] call is one
//! transaction: every row of the batch commits, or none does.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::RowBatch;

pub use self::memory::MemorySink;
pub use self::postgres::PostgresSink;

#[async_trait]
pub trait RowSink: Send + Sync {
    /// Prepare the target (create tables etc). Called once before a run.
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Insert all rows of `batch` atomically.
    ///
    /// Returns the number of rows newly written. Rows whose timestamp already
    /// exists are ignored, so re-inserting a file is harmless.
    async fn insert_batch(&self, batch: &RowBatch) -> Result<u64>;
}
