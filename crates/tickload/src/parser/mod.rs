//! Row parsers
//!
//! One [`RowParser`] per supported file format, looked up by the format the
//! file source derived from the extension. Parsing is all-or-nothing: a
//! single bad row fails the whole file so no partial batch reaches the sink.

pub mod delimited;
pub mod json_lines;

use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{IngestError, Result};
use crate::models::{FileFormat, FileRecord, MinuteBar, RowBatch};

pub use delimited::CsvBarParser;
pub use json_lines::JsonLinesBarParser;

/// Parser for one file format
pub trait RowParser: Send + Sync {
    fn format(&self) -> FileFormat;

    /// Parse a whole file's contents into a batch.
    ///
    /// The record supplies the trading day, which is combined with each row's
    /// time of day.
    fn parse(&self, record: &FileRecord, data: &[u8]) -> Result<RowBatch>;
}

/// Format → parser lookup
#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: HashMap<FileFormat, Arc<dyn RowParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in parser.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CsvBarParser));
        registry.register(Arc::new(JsonLinesBarParser));
        registry
    }

    pub fn register(&mut self, parser: Arc<dyn RowParser>) {
        self.parsers.insert(parser.format(), parser);
    }

    pub fn get(&self, format: FileFormat) -> Option<Arc<dyn RowParser>> {
        self.parsers.get(&format).cloned()
    }

    /// Parse `data` with the parser registered for the record's format.
    pub fn parse(&self, record: &FileRecord, data: &[u8]) -> Result<RowBatch> {
        let parser = self.get(record.format).ok_or_else(|| {
            IngestError::parse(
                &record.file_name,
                format!("no parser registered for format '{}'", record.format.as_str()),
            )
        })?;
        parser.parse(record, data)
    }
}

/// Wire shape shared by both formats. CSV uses the capitalized headers of the
/// upstream export; JSON lines use the lowercase aliases.
#[derive(Debug, Deserialize)]
pub(crate) struct RawObservation {
    #[serde(rename = "Time", alias = "time")]
    time: String,
    #[serde(rename = "Open", alias = "open", default)]
    open: Option<f64>,
    #[serde(rename = "High", alias = "high", default)]
    high: Option<f64>,
    #[serde(rename = "Low", alias = "low", default)]
    low: Option<f64>,
    #[serde(rename = "Close", alias = "close", default)]
    close: Option<f64>,
    #[serde(rename = "Volume_(BTC)", alias = "volume_btc", default)]
    volume_btc: Option<f64>,
    #[serde(rename = "Volume_(Currency)", alias = "volume_currency", default)]
    volume_currency: Option<f64>,
    #[serde(rename = "Weighted_Price", alias = "weighted_price", default)]
    weighted_price: Option<f64>,
}

impl RawObservation {
    /// Convert to a bar on `date`. Returns `Ok(None)` for rows with no data.
    pub(crate) fn into_bar(self, date: NaiveDate) -> std::result::Result<Option<MinuteBar>, String> {
        let time = NaiveTime::parse_from_str(self.time.trim(), "%H:%M:%S")
            .map_err(|e| format!("invalid time '{}': {}", self.time, e))?;

        let bar = MinuteBar {
            date_time: date.and_time(time).and_utc(),
            open_price: self.open,
            high_price: self.high,
            low_price: self.low,
            close_price: self.close,
            volume_btc: self.volume_btc,
            volume_currency: self.volume_currency,
            weighted_price: self.weighted_price,
        };

        Ok((!bar.is_empty()).then_some(bar))
    }
}
