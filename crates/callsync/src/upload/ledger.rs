//! Failure ledger
//!
//! Append-only record of every row whose audio could not be transferred.
//! Operators read it to retry rows by hand; the pipeline never reads it back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ledger csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// One failed row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub call_id: String,
    pub stage: String,
    pub error: String,
    pub source_url: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

pub trait FailureLedger: Send + Sync {
    fn append(&self, entries: &[LedgerEntry]) -> Result<(), LedgerError>;
}

/// CSV file ledger. The header is written only when the file is new or empty.
pub struct CsvFailureLedger {
    path: PathBuf,
    lock: Mutex<()>,
}

impl CsvFailureLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FailureLedger for CsvFailureLedger {
    fn append(&self, entries: &[LedgerEntry]) -> Result<(), LedgerError> {
        if entries.is_empty() {
            return Ok(());
        }

        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let needs_header = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        for entry in entries {
            writer.serialize(entry)?;
        }
        writer.flush()?;

        debug!(path = %self.path.display(), entries = entries.len(), "Appended to failure ledger");
        Ok(())
    }
}
