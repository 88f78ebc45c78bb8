//! Run coordination
//!
//! One run: enumerate the data directory, feed the bounded work queue from a
//! blocking producer, and drain it with a fixed number of workers. The run
//! ends when the producer has finished and every worker has seen end of work.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::dedup::DedupStore;
use crate::error::Result;
use crate::parser::ParserRegistry;
use crate::queue;
use crate::sink::RowSink;
use crate::source::FileSource;
use crate::worker::{FileOutcome, IngestionWorker, WorkerContext};

/// Failure counts by category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureCounts {
    pub parse: usize,
    pub insert: usize,
    pub mark: usize,
    pub store_unavailable: usize,
    pub other: usize,
}

impl FailureCounts {
    pub fn total(&self) -> usize {
        self.parse + self.insert + self.mark + self.store_unavailable + self.other
    }

    fn merge(&mut self, other: &FailureCounts) {
        self.parse += other.parse;
        self.insert += other.insert;
        self.mark += other.mark;
        self.store_unavailable += other.store_unavailable;
        self.other += other.other;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedFile {
    pub file_name: String,
    pub category: &'static str,
    pub message: String,
}

/// Totals for one run (or the sum of several in watch mode)
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Id of the first run summed into this summary
    pub run_id: Uuid,
    pub discovered: usize,
    pub inserted: usize,
    pub skipped: usize,
    pub failed: FailureCounts,
    pub rows_inserted: u64,
    pub elapsed: Duration,
    pub failures: Vec<FailedFile>,
}

impl RunSummary {
    pub fn record(&mut self, file_name: &str, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Inserted { rows } => {
                self.inserted += 1;
                self.rows_inserted += rows;
            },
            FileOutcome::Skipped => self.skipped += 1,
            FileOutcome::Failed(e) => {
                match e.category() {
                    "parse" => self.failed.parse += 1,
                    "insert" => self.failed.insert += 1,
                    "mark" => self.failed.mark += 1,
                    "store_unavailable" => self.failed.store_unavailable += 1,
                    _ => self.failed.other += 1,
                }
                self.failures.push(FailedFile {
                    file_name: file_name.to_string(),
                    category: e.category(),
                    message: e.to_string(),
                });
            },
        }
    }

    pub fn merge(&mut self, other: RunSummary) {
        if self.run_id.is_nil() {
            self.run_id = other.run_id;
        }
        self.discovered += other.discovered;
        self.inserted += other.inserted;
        self.skipped += other.skipped;
        self.failed.merge(&other.failed);
        self.rows_inserted += other.rows_inserted;
        self.elapsed += other.elapsed;
        self.failures.extend(other.failures);
    }

    /// Files that reached a final outcome.
    pub fn processed(&self) -> usize {
        self.inserted + self.skipped + self.failed.total()
    }

    /// Names of failed files, sorted.
    pub fn failed_files(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.failures.iter().map(|f| f.file_name.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn log(&self) {
        info!(
            run_id = %self.run_id,
            discovered = self.discovered,
            inserted = self.inserted,
            skipped = self.skipped,
            failed = self.failed.total(),
            failed_parse = self.failed.parse,
            failed_insert = self.failed.insert,
            failed_mark = self.failed.mark,
            failed_store = self.failed.store_unavailable,
            failed_other = self.failed.other,
            rows = self.rows_inserted,
            elapsed_ms = self.elapsed.as_millis() as u64,
            "Ingestion run complete"
        );
        for failure in &self.failures {
            warn!(
                file = %failure.file_name,
                category = failure.category,
                error = %failure.message,
                "Failed file"
            );
        }
    }
}

pub struct IngestionCoordinator {
    source: FileSource,
    ctx: Arc<WorkerContext>,
    workers: usize,
    queue_capacity: usize,
}

impl IngestionCoordinator {
    pub fn new(
        settings: &IngestConfig,
        dedup: Arc<dyn DedupStore>,
        sink: Arc<dyn RowSink>,
        parsers: ParserRegistry,
    ) -> Self {
        let source = FileSource::new(settings.data_directory.clone(), settings.file_prefix.clone());
        Self {
            source,
            ctx: Arc::new(WorkerContext {
                dedup,
                sink,
                parsers,
                namespace: settings.dedup_namespace.clone(),
            }),
            workers: settings.worker_count(),
            queue_capacity: settings.queue_capacity(),
        }
    }

    /// Ingest every eligible file currently in the data directory.
    ///
    /// Only directory access is fatal; per-file failures end up in the summary.
    pub async fn run(&self) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        self.run_inner(run_id)
            .instrument(info_span!("run", %run_id))
            .await
    }

    async fn run_inner(&self, run_id: Uuid) -> Result<RunSummary> {
        let started = Instant::now();
        let files = self.source.enumerate()?;

        info!(
            directory = %self.source.directory().display(),
            workers = self.workers,
            queue_capacity = self.queue_capacity,
            "Starting ingestion run"
        );

        let (producer, consumer) = queue::bounded(self.queue_capacity);
        let counters = consumer.counters();

        // Oldest day first
        let feeder = tokio::task::spawn_blocking(move || {
            let mut enqueued = 0usize;
            for record in files.into_date_order() {
                if let Err(closed) = producer.blocking_enqueue(record) {
                    warn!(error = %closed, "All workers gone, stopping enumeration");
                    break;
                }
                enqueued += 1;
            }
            enqueued
        });

        let mut workers = JoinSet::new();
        for worker_id in 0..self.workers {
            let worker = IngestionWorker::new(worker_id, self.ctx.clone());
            workers.spawn(worker.run(consumer.clone()).in_current_span());
        }
        // Workers now hold the only receivers
        drop(consumer);

        let mut summary = RunSummary {
            run_id,
            ..RunSummary::default()
        };
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(partial) => summary.merge(partial),
                Err(e) => error!(error = %e, "Worker task failed"),
            }
        }

        match feeder.await {
            Ok(enqueued) => summary.discovered = enqueued,
            Err(e) => error!(error = %e, "File enumeration task failed"),
        }

        let lost = counters.enqueued().saturating_sub(counters.dequeued());
        if lost > 0 {
            warn!(lost, "Queued files were never picked up by a worker");
        }
        debug!(
            enqueued = counters.enqueued(),
            dequeued = counters.dequeued(),
            "Queue accounting"
        );

        summary.elapsed = started.elapsed();
        Ok(summary)
    }

    /// Run, then rescan every `interval` until `shutdown` resolves.
    ///
    /// Shutdown is only observed between runs. Returns the summed summary.
    pub async fn run_watch<F>(&self, interval: Duration, shutdown: F) -> Result<RunSummary>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut total = RunSummary::default();
        let mut cycle = 0u64;

        loop {
            cycle += 1;
            let summary = self.run().await?;
            if summary.inserted > 0 || summary.failed.total() > 0 {
                summary.log();
            } else {
                debug!(cycle, discovered = summary.discovered, "Nothing new");
            }
            total.merge(summary);

            tokio::select! {
                _ = &mut shutdown => {
                    info!(cycles = cycle, "Shutdown requested, leaving watch mode");
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }

        Ok(total)
    }
}
