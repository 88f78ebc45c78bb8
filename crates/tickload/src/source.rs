//! File source: enumerates eligible input files in a directory
//!
//! A file is eligible when its name looks like `<prefix><YYYY-MM-DD>.<ext>`,
//! the date is a real calendar day, and the extension has a registered
//! parser. Anything else is skipped with a debug log.
//!
//! [`FileSource::enumerate`] returns a lazy iterator over one directory scan.
//! It cannot be rewound; calling `enumerate` again performs a fresh scan.

use chrono::{NaiveDate, Utc};
use std::fs::ReadDir;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{IngestError, Result};
use crate::models::{FileFormat, FileRecord};

const DATE_LEN: usize = 10;

/// Scans one directory for input files
#[derive(Debug, Clone)]
pub struct FileSource {
    directory: PathBuf,
    prefix: Option<String>,
}

impl FileSource {
    pub fn new(directory: impl Into<PathBuf>, prefix: Option<String>) -> Self {
        Self {
            directory: directory.into(),
            prefix: prefix.filter(|p| !p.is_empty()),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Start a scan. Fails only if the directory itself cannot be opened.
    pub fn enumerate(&self) -> Result<FileRecords> {
        let entries =
            std::fs::read_dir(&self.directory).map_err(|source| IngestError::DirectoryAccess {
                path: self.directory.clone(),
                source,
            })?;

        debug!(directory = %self.directory.display(), "Scanning data directory");

        Ok(FileRecords {
            entries,
            prefix: self.prefix.clone(),
        })
    }
}

/// Lazy, single-pass sequence of eligible files from one scan
pub struct FileRecords {
    entries: ReadDir,
    prefix: Option<String>,
}

impl FileRecords {
    /// Drain the scan into a list ordered by file date, then name.
    pub fn into_date_order(self) -> Vec<FileRecord> {
        let mut records: Vec<FileRecord> = self.collect();
        records.sort_by(|a, b| {
            a.file_date
                .cmp(&b.file_date)
                .then_with(|| a.file_name.cmp(&b.file_name))
        });
        records
    }
}

impl Iterator for FileRecords {
    type Item = FileRecord;

    fn next(&mut self) -> Option<Self::Item> {
        for entry in self.entries.by_ref() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable directory entry");
                    continue;
                },
            };

            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let Some(file_name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string)
            else {
                debug!(path = %path.display(), "Skipping file with non UTF-8 name");
                continue;
            };

            match classify(&file_name, self.prefix.as_deref()) {
                Some((file_date, format)) => {
                    return Some(FileRecord {
                        path,
                        file_name,
                        file_date,
                        format,
                        discovered_at: Utc::now(),
                    });
                },
                None => debug!(file = %file_name, "Ignoring file with unexpected name"),
            }
        }
        None
    }
}

/// Decide whether `file_name` is an input file, returning its date and format.
pub fn classify(file_name: &str, prefix: Option<&str>) -> Option<(NaiveDate, FileFormat)> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    let format = FileFormat::from_extension(ext)?;
    let date = extract_date(stem, prefix)?;
    Some((date, format))
}

/// Extract the trading day from a file stem such as `btcusd-2023-10-01`.
pub fn extract_date(stem: &str, prefix: Option<&str>) -> Option<NaiveDate> {
    if stem.len() < DATE_LEN || !stem.is_char_boundary(stem.len() - DATE_LEN) {
        return None;
    }
    let (head, date_str) = stem.split_at(stem.len() - DATE_LEN);

    if let Some(prefix) = prefix {
        if head != prefix {
            return None;
        }
    }

    let well_formed = date_str.char_indices().all(|(i, c)| match i {
        4 | 7 => c == '-',
        _ => c.is_ascii_digit(),
    });
    if !well_formed {
        return None;
    }

    NaiveDate::parse_from_str(date_str, "%Y-%m-%d").ok()
}
