//! JSON-lines minute-bar parser (`.jsonl`, `.ndjson`)
//!
//! One object per line, lowercase keys:
//! `{"time":"00:00:00","open":1.0,"high":1.2,...,"weighted_price":1.1}`

use tracing::debug;

use super::{RawObservation, RowParser};
use crate::error::{IngestError, Result};
use crate::models::{FileFormat, FileRecord, RowBatch};

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLinesBarParser;

impl RowParser for JsonLinesBarParser {
    fn format(&self) -> FileFormat {
        FileFormat::JsonLines
    }

    fn parse(&self, record: &FileRecord, data: &[u8]) -> Result<RowBatch> {
        let file = record.file_name.as_str();
        let text = std::str::from_utf8(data).map_err(|e| IngestError::parse(file, e))?;

        let mut rows = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let raw: RawObservation = serde_json::from_str(line)
                .map_err(|e| IngestError::parse(file, format!("line {}: {}", idx + 1, e)))?;

            match raw.into_bar(record.file_date) {
                Ok(Some(bar)) => rows.push(bar),
                Ok(None) => {},
                Err(message) => {
                    return Err(IngestError::parse(file, format!("line {}: {}", idx + 1, message)))
                },
            }
        }

        debug!(file, rows = rows.len(), "Parsed JSON-lines file");
        Ok(RowBatch::new(file, rows))
    }
}
