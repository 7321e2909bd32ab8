//! Run orchestrator
//!
//! INIT -> EXTRACTING -> TRANSFORMING -> UPLOADING -> LOADING -> SUMMARIZING,
//! ending in SUCCESS, PARTIAL_SUCCESS (some uploads failed) or FAILURE (an
//! extraction, lookup, load or audit error). The batch lives only in this
//! call; the audit store is the only state carried between runs.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use super::context::{RunContext, RunState};
use super::snapshot::write_snapshot;
use super::summary::RunSummary;
use crate::db::{AuditStore, CallTable};
use crate::error::{PipelineError, PipelineResult};
use crate::extract::Extractor;
use crate::load::Loader;
use crate::models::RunWindow;
use crate::transform::Transformer;
use crate::upload::AudioUploader;

/// Window bounds supplied on the command line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowOverride {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

pub struct Pipeline {
    extractor: Extractor,
    transformer: Transformer,
    uploader: AudioUploader,
    loader: Loader,
    table: Arc<dyn CallTable>,
    audit: Arc<dyn AuditStore>,
    snapshot_path: Option<PathBuf>,
}

impl Pipeline {
    pub fn new(
        extractor: Extractor,
        transformer: Transformer,
        uploader: AudioUploader,
        table: Arc<dyn CallTable>,
        audit: Arc<dyn AuditStore>,
    ) -> Self {
        let loader = Loader::new(table.clone(), audit.clone());
        Self {
            extractor,
            transformer,
            uploader,
            loader,
            table,
            audit,
            snapshot_path: None,
        }
    }

    pub fn with_snapshot_path(mut self, path: Option<PathBuf>) -> Self {
        self.snapshot_path = path;
        self
    }

    /// Start from the override if given. Otherwise start from the last
    /// audit's completion time, moved back to the oldest row whose audio is
    /// still missing so the platform returns that call again. The end stays
    /// open unless overridden.
    pub async fn resolve_window(&self, overrides: WindowOverride) -> PipelineResult<RunWindow> {
        let start = match overrides.start {
            Some(start) => Some(start),
            None => {
                let watermark = self
                    .audit
                    .last_audit()
                    .await
                    .map_err(PipelineError::Audit)?
                    .map(|record| record.completed_at);
                let pending = self
                    .table
                    .oldest_incomplete_upload()
                    .await
                    .map_err(PipelineError::Pending)?;

                match (watermark, pending) {
                    (Some(watermark), Some(pending)) if pending < watermark => {
                        info!(%watermark, %pending, "Rewinding window to retry incomplete uploads");
                        Some(pending)
                    }
                    (watermark, _) => watermark,
                }
            }
        };

        let window = RunWindow::new(start, overrides.end);
        if window.is_empty_range() {
            return Err(PipelineError::Window(format!(
                "start must be before end, got {}",
                window
            )));
        }
        Ok(window)
    }

    /// Execute one run. Failures are reported in the summary, never returned.
    #[instrument(skip_all)]
    pub async fn run(&self, overrides: WindowOverride) -> RunSummary {
        let mut ctx = RunContext::new();
        info!(run_id = %ctx.run_id, "Pipeline run starting");

        let mut summary = match self.execute(&mut ctx, overrides).await {
            Ok(outcome) => {
                let mut summary = RunSummary::from_context(&ctx);
                summary.audit_written = true;
                summary.transform_errors = outcome.transform_errors;
                summary.validation_errors = outcome.validation_errors;
                summary
            }
            Err(err) => {
                error!(run_id = %ctx.run_id, stage = err.stage(), error = %err, "Run aborted");
                ctx.advance(RunState::Failure);
                let mut summary = RunSummary::from_context(&ctx);
                summary.failed_stage = Some(err.stage());
                summary.error = Some(err.to_string());
                summary
            }
        };

        summary.finished_at = Utc::now();
        summary.log();
        summary
    }

    async fn execute(
        &self,
        ctx: &mut RunContext,
        overrides: WindowOverride,
    ) -> PipelineResult<RowErrors> {
        ctx.window = self.resolve_window(overrides).await?;
        info!(window = %ctx.window, "Window resolved");

        ctx.advance(RunState::Extracting);
        let extracted = self.extractor.extract(ctx.window).await?;
        ctx.counts.pages = extracted.pages_fetched as u64;
        ctx.counts.extracted = extracted.records.len() as u64;

        ctx.advance(RunState::Transforming);
        let transformed = self
            .transformer
            .transform(&extracted.records, self.table.as_ref())
            .await
            .map_err(PipelineError::Lookup)?;
        drop(extracted);
        ctx.counts.transformed = transformed.transformed as u64;
        ctx.counts.transform_errors = transformed.errors.len() as u64;
        ctx.counts.duplicates = transformed.duplicates as u64;
        ctx.counts.existing = transformed.existing as u64;
        ctx.counts.new_or_updated = transformed.new_or_updated() as u64;
        let mut rows = transformed.rows;

        ctx.advance(RunState::Uploading);
        let report = self.uploader.upload(&mut rows).await;
        ctx.counts.uploaded = report.counts.succeeded() as u64;
        ctx.counts.already_stored = report.counts.already_stored as u64;
        ctx.counts.skipped_no_url = report.counts.skipped_no_url as u64;
        ctx.counts.upload_failed = report.counts.failed as u64;

        if let Some(path) = &self.snapshot_path {
            if let Err(e) = write_snapshot(path, &rows) {
                warn!(path = %path.display(), error = %e, "Could not write batch snapshot");
            }
        }

        ctx.advance(RunState::Loading);
        let loaded = self.loader.load(rows, ctx.audit_draft()).await?;
        ctx.counts.loaded = loaded.loaded;
        ctx.counts.validation_failures = loaded.rejected.len() as u64;

        ctx.advance(RunState::Summarizing);
        if ctx.counts.upload_failed > 0 {
            ctx.advance(RunState::PartialSuccess);
        } else {
            ctx.advance(RunState::Success);
        }

        Ok(RowErrors {
            transform_errors: transformed.errors,
            validation_errors: loaded.rejected,
        })
    }
}

/// Recoverable per-row errors surfaced in the summary
struct RowErrors {
    transform_errors: Vec<crate::error::TransformError>,
    validation_errors: Vec<crate::error::ValidationError>,
}
