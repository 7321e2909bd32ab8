//! Pipeline error taxonomy
//!
//! Fatal errors (`ExtractionError`, `LoadError`, audit/lookup failures) are
//! propagated to the orchestrator as [`PipelineError`] and end the run in
//! FAILURE without an audit write. Recoverable errors (`TransformError`,
//! `ValidationError`, `UploadError`) are captured per row, counted, and
//! surfaced in the run summary and the failure ledger.

use thiserror::Error;

/// Result type alias for pipeline operations
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Fatal errors that abort a run
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Load failed: {0}")]
    Load(#[from] LoadError),

    #[error("Could not read last audit record: {0}")]
    Audit(#[source] StoreError),

    #[error("Could not read pending uploads: {0}")]
    Pending(#[source] StoreError),

    #[error("Could not look up existing calls: {0}")]
    Lookup(#[source] StoreError),

    #[error("Invalid run window: {0}")]
    Window(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Stage name used in logs and the run summary
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Extraction(_) => "extracting",
            PipelineError::Load(_) => "loading",
            PipelineError::Audit(_) | PipelineError::Pending(_) | PipelineError::Window(_) => {
                "init"
            }
            PipelineError::Lookup(_) => "transforming",
            PipelineError::Config(_) => "config",
        }
    }
}

/// Page fetch failures. Any of these aborts extraction.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("request for page {page} failed: {message}")]
    Request { page: u32, message: String },

    #[error("page {page} timed out")]
    Timeout { page: u32 },

    #[error("page {page} returned HTTP {status}: {body}")]
    Status { page: u32, status: u16, body: String },

    #[error("page {page} could not be decoded: {message}")]
    Decode { page: u32, message: String },

    #[error("window holds {total} calls, above the limit of {limit}; narrow the date range")]
    WindowTooLarge { total: u64, limit: u64 },
}

impl ExtractionError {
    pub fn from_reqwest(page: u32, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ExtractionError::Timeout { page }
        } else if err.is_decode() {
            ExtractionError::Decode {
                page,
                message: err.to_string(),
            }
        } else {
            ExtractionError::Request {
                page,
                message: err.to_string(),
            }
        }
    }
}

/// A raw record that could not be mapped into a row. The record is dropped.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("record #{index} rejected: {reason}")]
pub struct TransformError {
    pub index: usize,
    pub call_id: Option<String>,
    pub reason: String,
}

/// A row that failed the load schema. The row is excluded from the write set.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("row '{call_id}' is missing required fields: {}", .missing.join(", "))]
pub struct ValidationError {
    pub call_id: String,
    pub missing: Vec<&'static str>,
}

/// Which step of the per-row upload failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    Fetch,
    Store,
    Sign,
}

impl UploadStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStage::Fetch => "fetch",
            UploadStage::Store => "store",
            UploadStage::Sign => "sign",
        }
    }
}

/// Per-row audio transfer failure. The row continues to the loader.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UploadError {
    #[error("download failed: {0}")]
    Fetch(String),

    #[error("source returned HTTP {0}")]
    SourceStatus(u16),

    #[error("asset is {bytes} bytes, above the {limit} byte limit")]
    TooLarge { bytes: u64, limit: u64 },

    #[error("asset body is empty")]
    Empty,

    #[error("storage rejected upload: {0}")]
    Store(String),

    #[error("could not sign url: {0}")]
    Sign(String),

    #[error("{} step timed out after {secs}s", .stage.as_str())]
    Timeout { stage: UploadStage, secs: u64 },
}

impl UploadError {
    pub fn stage(&self) -> UploadStage {
        match self {
            UploadError::Fetch(_)
            | UploadError::SourceStatus(_)
            | UploadError::TooLarge { .. }
            | UploadError::Empty => UploadStage::Fetch,
            UploadError::Store(_) => UploadStage::Store,
            UploadError::Sign(_) => UploadStage::Sign,
            UploadError::Timeout { stage, .. } => *stage,
        }
    }
}

/// Target table / audit store failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("not found: {0}")]
    NotFound(String),
}

/// Upsert or audit write failure. Nothing from the run is considered committed.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("upsert failed: {0}")]
    Upsert(#[source] StoreError),

    #[error("audit write failed: {0}")]
    Audit(#[source] StoreError),
}
