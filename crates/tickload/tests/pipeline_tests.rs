//! End-to-end pipeline tests with in-memory stores
//!
//! Covers the run-level guarantees:
//! 1. Unprocessed files are inserted once and marked
//! 2. Already-marked files are skipped and left untouched
//! 3. A failing file is neither committed nor marked, and is retried next run
//! 4. Every discovered file is handled exactly once, whatever the worker count
//! 5. A panic while processing a file fails that file and the run still ends

mod common;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tickload::dedup::{DedupStore, MemoryDedupStore};
use tickload::models::DedupKey;
use tickload::parser::ParserRegistry;
use tickload::sink::MemorySink;
use tickload::{IngestError, IngestionCoordinator, RunSummary};
use tracing::info;

use common::{day_names, init_tracing, settings, write_day, write_raw};

const NS: &str = "processed_files";

fn key(file_name: &str) -> String {
    format!("{}:{}", NS, file_name)
}

async fn run_once(
    dir: &TempDir,
    workers: usize,
    dedup: &Arc<MemoryDedupStore>,
    sink: &Arc<MemorySink>,
) -> Result<RunSummary> {
    let coordinator = IngestionCoordinator::new(
        &settings(dir.path(), workers),
        dedup.clone(),
        sink.clone(),
        ParserRegistry::with_defaults(),
    );
    Ok(coordinator.run().await?)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_marked_file_skipped_and_untouched() -> Result<()> {
    init_tracing();
    info!("🧪 Testing skip of an already processed file");

    let dir = TempDir::new()?;
    write_day(dir.path(), "2024-01-01.csv", 30);
    write_day(dir.path(), "2024-01-02.csv", 30);

    let dedup = Arc::new(MemoryDedupStore::with_keys([key("2024-01-02.csv")]));
    let sink = Arc::new(MemorySink::new());

    let summary = run_once(&dir, 2, &dedup, &sink).await?;

    assert_eq!(summary.discovered, 2);
    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.rows_inserted, 30);

    assert_eq!(sink.inserted_files(), vec!["2024-01-01.csv".to_string()]);
    assert_eq!(sink.insert_count("2024-01-02.csv"), 0);
    assert_eq!(sink.row_count(), 30);

    // Both marked at the end; the pre-marked one was never written again
    assert!(dedup.contains(&key("2024-01-01.csv")));
    assert!(dedup.contains(&key("2024-01-02.csv")));
    assert_eq!(dedup.mark_calls(), 1);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_insert_failure_leaves_file_unmarked_and_retries() -> Result<()> {
    init_tracing();

    let dir = TempDir::new()?;
    write_day(dir.path(), "2024-01-01.csv", 10);
    write_day(dir.path(), "2024-01-03.csv", 10);

    let dedup = Arc::new(MemoryDedupStore::new());
    let sink = Arc::new(MemorySink::new());
    sink.fail_on("2024-01-03.csv");

    let first = run_once(&dir, 2, &dedup, &sink).await?;
    assert_eq!(first.inserted, 1);
    assert_eq!(first.failed.insert, 1);
    assert_eq!(first.failed_files(), vec!["2024-01-03.csv"]);
    assert_eq!(sink.insert_count("2024-01-03.csv"), 0);
    assert_eq!(sink.row_count(), 10);
    assert!(!dedup.contains(&key("2024-01-03.csv")));

    sink.clear_failure("2024-01-03.csv");
    let second = run_once(&dir, 2, &dedup, &sink).await?;
    assert_eq!(second.inserted, 1);
    assert_eq!(second.skipped, 1);
    assert_eq!(second.rows_inserted, 10);
    assert_eq!(sink.insert_count("2024-01-01.csv"), 1);
    assert_eq!(sink.insert_count("2024-01-03.csv"), 1);
    assert!(dedup.contains(&key("2024-01-03.csv")));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parse_failure_does_not_stop_other_files() -> Result<()> {
    init_tracing();

    let dir = TempDir::new()?;
    let names = day_names(6);
    for name in &names {
        write_day(dir.path(), name, 5);
    }
    // Malformed value on the second data line
    write_raw(
        dir.path(),
        "2024-01-07.csv",
        "Time,Open,Close\n00:00:00,1,2\n00:01:00,abc,2\n",
    );

    let dedup = Arc::new(MemoryDedupStore::new());
    let sink = Arc::new(MemorySink::new());
    let summary = run_once(&dir, 3, &dedup, &sink).await?;

    assert_eq!(summary.discovered, 7);
    assert_eq!(summary.inserted, 6);
    assert_eq!(summary.failed.parse, 1);
    assert_eq!(summary.failed_files(), vec!["2024-01-07.csv"]);
    assert_eq!(sink.row_count(), 30);
    assert_eq!(sink.insert_count("2024-01-07.csv"), 0);
    assert!(!dedup.contains(&key("2024-01-07.csv")));
    for name in &names {
        assert!(dedup.contains(&key(name)), "{} not marked", name);
    }

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_file_handled_exactly_once() -> Result<()> {
    init_tracing();

    let dir = TempDir::new()?;
    let names = day_names(40);
    for name in &names {
        write_day(dir.path(), name, 3);
    }

    let dedup = Arc::new(MemoryDedupStore::new());
    let sink = Arc::new(MemorySink::new());
    let summary = run_once(&dir, 4, &dedup, &sink).await?;

    assert_eq!(summary.discovered, 40);
    assert_eq!(summary.processed(), 40);
    assert_eq!(summary.inserted, 40);
    assert_eq!(sink.row_count(), 120);
    for name in &names {
        assert_eq!(sink.insert_count(name), 1, "{} inserted more than once", name);
    }
    assert_eq!(dedup.mark_calls(), 40);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_run_matches_sequential_run() -> Result<()> {
    init_tracing();

    let dir = TempDir::new()?;
    for name in day_names(12) {
        write_day(dir.path(), &name, 4);
    }
    write_raw(dir.path(), "2024-02-01.csv", "Open\n1\n");
    write_raw(dir.path(), "notes.txt", "ignored");

    let mut outcomes = Vec::new();
    for workers in [1, 4] {
        let dedup = Arc::new(MemoryDedupStore::with_keys([key("2024-01-05.csv")]));
        let sink = Arc::new(MemorySink::new());
        let summary = run_once(&dir, workers, &dedup, &sink).await?;
        outcomes.push((
            sink.inserted_files(),
            sink.rows(),
            summary.inserted,
            summary.skipped,
            summary
                .failed_files()
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>(),
        ));
    }

    assert_eq!(outcomes[0], outcomes[1]);
    assert_eq!(outcomes[0].2, 11);
    assert_eq!(outcomes[0].3, 1);
    assert_eq!(outcomes[0].4, vec!["2024-02-01.csv".to_string()]);

    Ok(())
}

#[tokio::test]
async fn test_store_outage_fails_items_but_not_the_run() -> Result<()> {
    init_tracing();

    let dir = TempDir::new()?;
    for name in day_names(3) {
        write_day(dir.path(), &name, 2);
    }

    let dedup = Arc::new(MemoryDedupStore::new());
    dedup.set_unavailable(true);
    let sink = Arc::new(MemorySink::new());

    let summary = run_once(&dir, 2, &dedup, &sink).await?;
    assert_eq!(summary.failed.store_unavailable, 3);
    assert_eq!(summary.inserted, 0);
    assert_eq!(sink.row_count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_mark_failure_reported_and_reload_is_harmless() -> Result<()> {
    init_tracing();

    let dir = TempDir::new()?;
    write_day(dir.path(), "2024-01-01.csv", 8);

    let dedup = Arc::new(MemoryDedupStore::new());
    dedup.set_fail_marks(true);
    let sink = Arc::new(MemorySink::new());

    let first = run_once(&dir, 1, &dedup, &sink).await?;
    assert_eq!(first.failed.mark, 1);
    assert_eq!(sink.row_count(), 8);
    assert!(dedup.is_empty());

    // Next run loads the file again; conflicting rows are ignored
    dedup.set_fail_marks(false);
    let second = run_once(&dir, 1, &dedup, &sink).await?;
    assert_eq!(second.inserted, 1);
    assert_eq!(second.rows_inserted, 0);
    assert_eq!(sink.row_count(), 8);
    assert!(dedup.contains(&key("2024-01-01.csv")));

    Ok(())
}

#[tokio::test]
async fn test_missing_directory_is_fatal() -> Result<()> {
    let dir = TempDir::new()?;
    let missing = dir.path().join("does-not-exist");

    let coordinator = IngestionCoordinator::new(
        &settings(&missing, 2),
        Arc::new(MemoryDedupStore::new()),
        Arc::new(MemorySink::new()),
        ParserRegistry::with_defaults(),
    );

    let err = coordinator.run().await.unwrap_err();
    assert!(matches!(err, IngestError::DirectoryAccess { .. }));
    assert!(err.is_fatal());

    Ok(())
}

#[tokio::test]
async fn test_prefix_and_json_lines() -> Result<()> {
    init_tracing();

    let dir = TempDir::new()?;
    write_day(dir.path(), "btcusd-2023-10-01.csv", 5);
    write_day(dir.path(), "ethusd-2023-10-01.csv", 5);
    write_raw(
        dir.path(),
        "btcusd-2023-10-02.jsonl",
        "{\"time\":\"00:00:00\",\"open\":27000.5,\"close\":27001.0}\n\
         {\"time\":\"00:01:00\",\"open\":null}\n",
    );

    let mut ingest = settings(dir.path(), 2);
    ingest.file_prefix = Some("btcusd-".to_string());

    let dedup = Arc::new(MemoryDedupStore::new());
    let sink = Arc::new(MemorySink::new());
    let coordinator = IngestionCoordinator::new(
        &ingest,
        dedup.clone(),
        sink.clone(),
        ParserRegistry::with_defaults(),
    );
    let summary = coordinator.run().await?;

    assert_eq!(summary.discovered, 2);
    assert_eq!(summary.inserted, 2);
    assert_eq!(sink.row_count(), 6);
    assert!(dedup.contains(&key("btcusd-2023-10-02.jsonl")));
    assert!(!dedup.contains(&key("ethusd-2023-10-01.csv")));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watch_picks_up_new_files() -> Result<()> {
    init_tracing();

    let dir = TempDir::new()?;
    write_day(dir.path(), "2024-01-01.csv", 3);

    let dedup = Arc::new(MemoryDedupStore::new());
    let sink = Arc::new(MemorySink::new());
    let coordinator = IngestionCoordinator::new(
        &settings(dir.path(), 2),
        dedup.clone(),
        sink.clone(),
        ParserRegistry::with_defaults(),
    );

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let watch = coordinator.run_watch(Duration::from_millis(20), async {
        let _ = stop_rx.await;
    });

    let driver = async {
        while sink.insert_count("2024-01-01.csv") == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        write_day(dir.path(), "2024-01-02.csv", 3);
        while sink.insert_count("2024-01-02.csv") == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let _ = stop_tx.send(());
    };

    let (summary, ()) = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(watch, driver)
    })
    .await?;
    let summary = summary?;

    assert_eq!(summary.inserted, 2);
    assert!(summary.skipped >= 1);
    assert_eq!(sink.insert_count("2024-01-01.csv"), 1);
    assert_eq!(sink.insert_count("2024-01-02.csv"), 1);

    Ok(())
}

#[tokio::test]
async fn test_watch_stops_after_one_cycle_when_already_shut_down() -> Result<()> {
    let dir = TempDir::new()?;
    write_day(dir.path(), "2024-01-01.csv", 3);

    let coordinator = IngestionCoordinator::new(
        &settings(dir.path(), 1),
        Arc::new(MemoryDedupStore::new()),
        Arc::new(MemorySink::new()),
        ParserRegistry::with_defaults(),
    );

    let summary = coordinator
        .run_watch(Duration::from_secs(3600), std::future::ready(()))
        .await?;
    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.discovered, 1);

    Ok(())
}

/// Dedup store whose lookups panic.
struct PanickingStore;

#[async_trait]
impl DedupStore for PanickingStore {
    async fn is_processed(&self, key: &DedupKey) -> tickload::Result<bool> {
        panic!("lookup exploded for {}", key);
    }

    async fn mark_processed(&self, _key: &DedupKey) -> tickload::Result<()> {
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_file_is_failed_and_run_completes() -> Result<()> {
    init_tracing();
    info!("🧪 Testing a run where every file panics");

    let dir = TempDir::new()?;
    for name in day_names(6) {
        write_day(dir.path(), &name, 5);
    }

    let mut ingest = settings(dir.path(), 1);
    ingest.queue_capacity = Some(1);
    let sink = Arc::new(MemorySink::new());
    let coordinator = IngestionCoordinator::new(
        &ingest,
        Arc::new(PanickingStore),
        sink.clone(),
        ParserRegistry::with_defaults(),
    );

    let summary = tokio::time::timeout(Duration::from_secs(5), coordinator.run()).await??;

    assert_eq!(summary.discovered, 6);
    assert_eq!(summary.failed.other, 6);
    assert_eq!(summary.processed(), 6);
    assert!(summary.failures.iter().all(|f| f.category == "panic"));
    assert!(summary.failures[0].message.contains("lookup exploded"));
    assert_eq!(sink.row_count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_single_worker_ingests_oldest_day_first() -> Result<()> {
    init_tracing();

    let dir = TempDir::new()?;
    let mut names = day_names(5);
    // Create newest first so directory order is unlikely to match
    for name in names.iter().rev() {
        write_day(dir.path(), name, 2);
    }
    write_day(dir.path(), "2023-12-31.csv", 2);
    names.insert(0, "2023-12-31.csv".to_string());

    let dedup = Arc::new(MemoryDedupStore::new());
    let sink = Arc::new(MemorySink::new());
    let summary = run_once(&dir, 1, &dedup, &sink).await?;

    assert_eq!(summary.inserted, 6);
    assert_eq!(sink.commit_order(), names);

    Ok(())
}
