//! Callsync
//!
//! Incremental batch pipeline that copies call records and their recordings
//! from a call platform into Postgres and an S3-compatible bucket.
//!
//! A run pages through every call updated since the last successful run,
//! normalises and deduplicates them against the target table, uploads
//! recordings with a bounded worker pool, upserts the rows and writes an
//! audit record that becomes the next run's watermark.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use callsync::{
//!     config::Config,
//!     db::PgCallStore,
//!     extract::{Extractor, VapiClient},
//!     pipeline::{Pipeline, WindowOverride},
//!     storage::Storage,
//!     transform::Transformer,
//!     upload::{AudioUploader, CsvFailureLedger, HttpAudioSource},
//! };
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let db = Arc::new(PgCallStore::connect(&config.database).await?);
//! let extractor = Extractor::new(Arc::new(VapiClient::new(&config.api)?), &config.api);
//! let uploader = AudioUploader::new(
//!     Arc::new(Storage::new(config.storage.clone())),
//!     Arc::new(HttpAudioSource::new(config.pipeline.upload_timeout())?),
//!     &config.pipeline,
//! )
//! .with_ledger(Arc::new(CsvFailureLedger::new(&config.pipeline.failed_uploads_ledger)));
//!
//! let pipeline = Pipeline::new(
//!     extractor,
//!     Transformer::new(config.pipeline.existence_lookup_batch_size),
//!     uploader,
//!     db.clone(),
//!     db,
//! );
//! let summary = pipeline.run(WindowOverride::default()).await;
//! println!("{}", summary.render());
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod load;
pub mod models;
pub mod pipeline;
pub mod refresh;
pub mod storage;
pub mod transform;
pub mod upload;

pub use error::{PipelineError, PipelineResult};
pub use models::{AuditRecord, CallRecord, NormalizedRow, RunWindow, UploadStatus};
pub use pipeline::{Pipeline, RunState, RunSummary, WindowOverride};
