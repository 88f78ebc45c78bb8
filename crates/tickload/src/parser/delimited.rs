//! CSV minute-bar parser
//!
//! Expects the upstream export layout:
//!
//! ```text
//! Time,Open,High,Low,Close,Volume_(BTC),Volume_(Currency),Weighted_Price
//! 00:00:00,16529.59,16529.59,16497.85,16502.1,9.23,152421.22,16513.2
//! ```
//!
//! Empty cells become NULLs; rows where every value is empty are dropped.

use csv::{ReaderBuilder, Trim};
use tracing::debug;

use super::{RawObservation, RowParser};
use crate::error::{IngestError, Result};
use crate::models::{FileFormat, FileRecord, RowBatch};

#[derive(Debug, Clone, Copy, Default)]
pub struct CsvBarParser;

impl RowParser for CsvBarParser {
    fn format(&self) -> FileFormat {
        FileFormat::Csv
    }

    fn parse(&self, record: &FileRecord, data: &[u8]) -> Result<RowBatch> {
        let file = record.file_name.as_str();
        let mut reader = ReaderBuilder::new().trim(Trim::All).from_reader(data);

        let headers = reader.headers().map_err(|e| IngestError::parse(file, e))?;
        if !headers.iter().any(|h| h == "Time" || h == "time") {
            return Err(IngestError::parse(file, "missing 'Time' column"));
        }

        let mut rows = Vec::new();
        let mut dropped = 0usize;

        for (idx, result) in reader.deserialize::<RawObservation>().enumerate() {
            // Header is line 1.
            let line = idx + 2;
            let raw = result.map_err(|e| IngestError::parse(file, format!("line {}: {}", line, e)))?;

            match raw.into_bar(record.file_date) {
                Ok(Some(bar)) => rows.push(bar),
                Ok(None) => dropped += 1,
                Err(message) => {
                    return Err(IngestError::parse(file, format!("line {}: {}", line, message)))
                },
            }
        }

        debug!(file, rows = rows.len(), dropped, "Parsed CSV file");
        Ok(RowBatch::new(file, rows))
    }
}
