//! Ingestion worker
//!
//! Runs the per-file pipeline: dedup check, parse, insert, mark. The four
//! steps are strictly sequential for one file. Every error is contained in
//! the [`FileOutcome`] of the file that caused it; the worker then moves on
//! to the next record in the queue.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::coordinator::RunSummary;
use crate::dedup::DedupStore;
use crate::error::{IngestError, Result};
use crate::models::{DedupKey, FileRecord, RowBatch};
use crate::parser::ParserRegistry;
use crate::queue::QueueConsumer;
use crate::sink::RowSink;

/// Collaborators shared by every worker of a run
pub struct WorkerContext {
    pub dedup: Arc<dyn DedupStore>,
    pub sink: Arc<dyn RowSink>,
    pub parsers: ParserRegistry,
    pub namespace: String,
}

/// What happened to one file
#[derive(Debug)]
pub enum FileOutcome {
    /// Rows committed and the file marked processed
    Inserted { rows: u64 },
    /// Already marked before this run; left untouched
    Skipped,
    Failed(IngestError),
}

#[derive(Clone)]
pub struct IngestionWorker {
    worker_id: usize,
    ctx: Arc<WorkerContext>,
}

impl IngestionWorker {
    pub fn new(worker_id: usize, ctx: Arc<WorkerContext>) -> Self {
        Self { worker_id, ctx }
    }

    /// Drain the queue, returning this worker's share of the run summary.
    pub async fn run(self, queue: QueueConsumer) -> RunSummary {
        let mut summary = RunSummary::default();
        debug!(worker = self.worker_id, "Worker started");

        while let Some(record) = queue.dequeue().await {
            let file_name = record.file_name.clone();
            let outcome = self.process_isolated(record).await;
            summary.record(&file_name, &outcome);
        }

        debug!(
            worker = self.worker_id,
            files = summary.processed(),
            "Queue drained, worker exiting"
        );
        summary
    }

    /// Run one file on its own task so a panic fails that file, not the worker.
    async fn process_isolated(&self, record: FileRecord) -> FileOutcome {
        let file_name = record.file_name.clone();
        let worker = self.clone();
        let task =
            tokio::spawn(async move { worker.process_file(record).await }.in_current_span());

        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = panic_message(e);
                error!(
                    worker = self.worker_id,
                    file = %file_name,
                    error = %message,
                    "File processing panicked"
                );
                FileOutcome::Failed(IngestError::Panicked {
                    file: file_name,
                    message,
                })
            },
        }
    }

    /// Run the pipeline for one file.
    pub async fn process_file(&self, record: FileRecord) -> FileOutcome {
        let span = info_span!("file", worker = self.worker_id, file = %record.file_name);
        async move {
            let started = Instant::now();
            let key = DedupKey::for_record(&self.ctx.namespace, &record);

            let outcome = match self.pipeline(&record, &key).await {
                Ok(outcome) => outcome,
                Err(e) => FileOutcome::Failed(e),
            };

            match &outcome {
                FileOutcome::Inserted { rows } => info!(
                    rows,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "File ingested"
                ),
                FileOutcome::Skipped => info!("Already processed, skipping"),
                FileOutcome::Failed(e @ IngestError::Mark { .. }) => error!(
                    error = %e,
                    "Rows committed but file not marked; a later run will load it again"
                ),
                FileOutcome::Failed(e) => {
                    error!(category = e.category(), error = %e, "File failed")
                },
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn pipeline(&self, record: &FileRecord, key: &DedupKey) -> Result<FileOutcome> {
        // 1. dedup check
        let seen = self
            .ctx
            .dedup
            .is_processed(key)
            .await
            .map_err(as_store_unavailable)?;
        if seen {
            return Ok(FileOutcome::Skipped);
        }

        // 2. parse
        let batch = self.read_and_parse(record).await?;
        if batch.is_empty() {
            warn!("File contains no rows");
        }

        // 3. insert, one transaction per file
        let rows = self
            .ctx
            .sink
            .insert_batch(&batch)
            .await
            .map_err(as_insert_error)?;

        // 4. mark
        self.ctx
            .dedup
            .mark_processed(key)
            .await
            .map_err(|e| IngestError::Mark {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        Ok(FileOutcome::Inserted { rows })
    }

    async fn read_and_parse(&self, record: &FileRecord) -> Result<RowBatch> {
        let data = tokio::fs::read(&record.path)
            .await
            .map_err(|e| IngestError::parse(&record.file_name, format!("read failed: {}", e)))?;

        let parsers = self.ctx.parsers.clone();
        let owned = record.clone();
        tokio::task::spawn_blocking(move || parsers.parse(&owned, &data))
            .await
            .map_err(|e| IngestError::parse(&record.file_name, format!("parser task failed: {}", e)))?
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn as_store_unavailable(err: IngestError) -> IngestError {
    match err {
        IngestError::StoreUnavailable(_) => err,
        other => IngestError::StoreUnavailable(other.to_string()),
    }
}

fn as_insert_error(err: IngestError) -> IngestError {
    match err {
        IngestError::Insert(_) => err,
        other => IngestError::Insert(other.to_string()),
    }
}
