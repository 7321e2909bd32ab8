//! End-of-run report

use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::context::{RunContext, RunState, StageCounts};
use crate::error::{TransformError, ValidationError};
use crate::models::RunWindow;

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub state: RunState,
    pub window: RunWindow,
    pub counts: StageCounts,
    /// Stage that aborted the run, for FAILURE
    pub failed_stage: Option<&'static str>,
    pub error: Option<String>,
    pub transform_errors: Vec<TransformError>,
    pub validation_errors: Vec<ValidationError>,
    pub audit_written: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn from_context(ctx: &RunContext) -> Self {
        Self {
            run_id: ctx.run_id,
            state: ctx.state,
            window: ctx.window,
            counts: ctx.counts,
            failed_stage: None,
            error: None,
            transform_errors: Vec::new(),
            validation_errors: Vec::new(),
            audit_written: false,
            started_at: ctx.started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    /// Process exit code: 0 when the batch was committed
    pub fn exit_code(&self) -> u8 {
        if self.state.is_committed() {
            0
        } else {
            1
        }
    }

    /// Emit the summary as one structured event
    pub fn log(&self) {
        let c = &self.counts;
        match self.state {
            RunState::Success => info!(
                run_id = %self.run_id,
                state = %self.state,
                window = %self.window,
                extracted = c.extracted,
                transformed = c.transformed,
                existing = c.existing,
                new_or_updated = c.new_or_updated,
                uploaded = c.uploaded,
                failed = c.upload_failed,
                loaded = c.loaded,
                elapsed_secs = self.elapsed_secs(),
                "Run finished"
            ),
            RunState::PartialSuccess => warn!(
                run_id = %self.run_id,
                state = %self.state,
                window = %self.window,
                extracted = c.extracted,
                new_or_updated = c.new_or_updated,
                uploaded = c.uploaded,
                failed = c.upload_failed,
                loaded = c.loaded,
                elapsed_secs = self.elapsed_secs(),
                "Run finished with failed uploads"
            ),
            _ => error!(
                run_id = %self.run_id,
                state = %self.state,
                stage = self.failed_stage.unwrap_or("unknown"),
                error = self.error.as_deref().unwrap_or(""),
                elapsed_secs = self.elapsed_secs(),
                "Run failed"
            ),
        }
    }

    /// Plain-text report for the console
    pub fn render(&self) -> String {
        let c = &self.counts;
        let mut out = String::new();
        let _ = writeln!(out, "Run {} -> {}", self.run_id, self.state);
        let _ = writeln!(out, "  window              {}", self.window);
        let rows: [(&str, u64); 13] = [
            ("pages", c.pages),
            ("extracted", c.extracted),
            ("transformed", c.transformed),
            ("transform errors", c.transform_errors),
            ("duplicates", c.duplicates),
            ("existing", c.existing),
            ("new or updated", c.new_or_updated),
            ("uploaded", c.uploaded),
            ("already stored", c.already_stored),
            ("skipped (no url)", c.skipped_no_url),
            ("upload failed", c.upload_failed),
            ("validation failed", c.validation_failures),
            ("loaded", c.loaded),
        ];
        for (label, value) in rows {
            let _ = writeln!(out, "  {:<19} {}", label, value);
        }
        let _ = writeln!(
            out,
            "  audit written       {}",
            if self.audit_written { "yes" } else { "no" }
        );
        if let Some(err) = &self.error {
            let _ = writeln!(
                out,
                "  error ({})  {}",
                self.failed_stage.unwrap_or("unknown"),
                err
            );
        }
        let _ = write!(out, "  elapsed             {:.1}s", self.elapsed_secs());
        out
    }
}
