//! Error types for ingestion
//!
//! Two groups of variants:
//!
//! - run-fatal: [`IngestError::DirectoryAccess`], [`IngestError::PoolInit`],
//!   [`IngestError::Config`]. These abort the run and produce a non-zero exit.
//! - per-file: everything else. A worker logs them against the file that
//!   caused them and moves on to the next queued file.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Error types for the ingestion pipeline
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Cannot read data directory '{}': {source}", path.display())]
    DirectoryAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Dedup store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Parse error in '{file}': {message}")]
    Parse { file: String, message: String },

    #[error("Insert failed: {0}")]
    Insert(String),

    #[error("Inserted but could not mark '{key}' as processed: {message}")]
    Mark { key: String, message: String },

    #[error("Processing '{file}' panicked: {message}")]
    Panicked { file: String, message: String },

    #[error("Failed to initialize {kind} connections: {message}")]
    PoolInit { kind: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl IngestError {
    pub fn parse(file: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Parse {
            file: file.into(),
            message: message.to_string(),
        }
    }

    /// True for errors that must abort the whole run rather than one file.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IngestError::DirectoryAccess { .. } | IngestError::PoolInit { .. } | IngestError::Config(_)
        )
    }

    /// Short label used in run summaries and structured log fields.
    pub fn category(&self) -> &'static str {
        match self {
            IngestError::DirectoryAccess { .. } => "directory_access",
            IngestError::StoreUnavailable(_) => "store_unavailable",
            IngestError::Parse { .. } => "parse",
            IngestError::Insert(_) => "insert",
            IngestError::Mark { .. } => "mark",
            IngestError::Panicked { .. } => "panic",
            IngestError::PoolInit { .. } => "pool_init",
            IngestError::Config(_) => "config",
        }
    }
}

impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        IngestError::Insert(err.to_string())
    }
}

impl From<redis::RedisError> for IngestError {
    fn from(err: redis::RedisError) -> Self {
        IngestError::StoreUnavailable(err.to_string())
    }
}
