//! In-process sink for tests, dry runs and benchmarks

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use super::RowSink;
use crate::error::{IngestError, Result};
use crate::models::{MinuteBar, RowBatch};

#[derive(Debug, Default)]
struct SinkState {
    rows: BTreeMap<DateTime<Utc>, MinuteBar>,
    /// Successful `insert_batch` calls per source file
    inserts: HashMap<String, usize>,
    /// Source files in commit order
    commit_log: Vec<String>,
}

/// Table held in a `BTreeMap` keyed by timestamp
#[derive(Debug, Default)]
pub struct MemorySink {
    state: Mutex<SinkState>,
    fail_files: Mutex<HashSet<String>>,
    latency: Option<Duration>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every insert, simulating a network round trip.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Reject every batch coming from `file_name`.
    pub fn fail_on(&self, file_name: impl Into<String>) {
        if let Ok(mut files) = self.fail_files.lock() {
            files.insert(file_name.into());
        }
    }

    /// Stop rejecting batches from `file_name`.
    pub fn clear_failure(&self, file_name: &str) {
        if let Ok(mut files) = self.fail_files.lock() {
            files.remove(file_name);
        }
    }

    pub fn row_count(&self) -> usize {
        self.state.lock().map(|s| s.rows.len()).unwrap_or(0)
    }

    /// How many times a batch from `file_name` was committed.
    pub fn insert_count(&self, file_name: &str) -> usize {
        self.state
            .lock()
            .map(|s| s.inserts.get(file_name).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Names of all files with at least one committed batch, sorted.
    pub fn inserted_files(&self) -> Vec<String> {
        let mut files: Vec<String> = self
            .state
            .lock()
            .map(|s| s.inserts.keys().cloned().collect())
            .unwrap_or_default();
        files.sort();
        files
    }

    /// Source file of every committed batch, oldest first.
    pub fn commit_order(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.commit_log.clone())
            .unwrap_or_default()
    }

    pub fn rows(&self) -> Vec<MinuteBar> {
        self.state
            .lock()
            .map(|s| s.rows.values().cloned().collect())
            .unwrap_or_default()
    }

    fn should_fail(&self, file_name: &str) -> bool {
        self.fail_files
            .lock()
            .map(|files| files.contains(file_name))
            .unwrap_or(false)
    }
}

#[async_trait]
impl RowSink for MemorySink {
    async fn insert_batch(&self, batch: &RowBatch) -> Result<u64> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if self.should_fail(&batch.source_file) {
            return Err(IngestError::Insert(format!(
                "rejected batch from '{}'",
                batch.source_file
            )));
        }

        let mut state = self
            .state
            .lock()
            .map_err(|_| IngestError::Insert("sink lock poisoned".to_string()))?;

        let mut written = 0u64;
        for row in &batch.rows {
            if !state.rows.contains_key(&row.date_time) {
                state.rows.insert(row.date_time, row.clone());
                written += 1;
            }
        }
        *state.inserts.entry(batch.source_file.clone()).or_default() += 1;
        state.commit_log.push(batch.source_file.clone());

        Ok(written)
    }
}
