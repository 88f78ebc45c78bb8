//! Core types flowing through the pipeline

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Supported input formats, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    Csv,
    JsonLines,
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "csv" => Some(FileFormat::Csv),
            "jsonl" | "ndjson" => Some(FileFormat::JsonLines),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FileFormat::Csv => "csv",
            FileFormat::JsonLines => "jsonl",
        }
    }
}

/// One input file, as discovered by the file source.
///
/// Owned by exactly one worker once dequeued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: PathBuf,
    /// Base name; this is the file's identity for deduplication
    pub file_name: String,
    /// Trading day encoded in the file name
    pub file_date: NaiveDate,
    pub format: FileFormat,
    pub discovered_at: DateTime<Utc>,
}

/// Key under which a processed file is recorded in the dedup store.
///
/// Derived only from the namespace and the file name, so the same file maps to
/// the same key on every run and in every worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn new(namespace: &str, file_name: &str) -> Self {
        if namespace.is_empty() {
            Self(file_name.to_string())
        } else {
            Self(format!("{}:{}", namespace, file_name))
        }
    }

    pub fn for_record(namespace: &str, record: &FileRecord) -> Self {
        Self::new(namespace, &record.file_name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One minute of price observations (maps to a row of the target table)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinuteBar {
    pub date_time: DateTime<Utc>,
    pub open_price: Option<f64>,
    pub high_price: Option<f64>,
    pub low_price: Option<f64>,
    pub close_price: Option<f64>,
    pub volume_btc: Option<f64>,
    pub volume_currency: Option<f64>,
    pub weighted_price: Option<f64>,
}

impl MinuteBar {
    /// A bar with no price or volume data carries nothing worth storing.
    pub fn is_empty(&self) -> bool {
        self.open_price.is_none()
            && self.high_price.is_none()
            && self.low_price.is_none()
            && self.close_price.is_none()
            && self.volume_btc.is_none()
            && self.volume_currency.is_none()
            && self.weighted_price.is_none()
    }
}

/// All bars parsed from one file; inserted as a single unit.
#[derive(Debug, Clone, PartialEq)]
pub struct RowBatch {
    pub source_file: String,
    pub rows: Vec<MinuteBar>,
}

impl RowBatch {
    pub fn new(source_file: impl Into<String>, rows: Vec<MinuteBar>) -> Self {
        Self {
            source_file: source_file.into(),
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
