//! Per-run state threaded through every stage

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::models::{AuditRecord, RunWindow};

/// Orchestrator state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Init,
    Extracting,
    Transforming,
    Uploading,
    Loading,
    Summarizing,
    Success,
    PartialSuccess,
    Failure,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Init => "INIT",
            RunState::Extracting => "EXTRACTING",
            RunState::Transforming => "TRANSFORMING",
            RunState::Uploading => "UPLOADING",
            RunState::Loading => "LOADING",
            RunState::Summarizing => "SUMMARIZING",
            RunState::Success => "SUCCESS",
            RunState::PartialSuccess => "PARTIAL_SUCCESS",
            RunState::Failure => "FAILURE",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Success | RunState::PartialSuccess | RunState::Failure
        )
    }

    /// SUCCESS and PARTIAL_SUCCESS both mean the batch was committed
    pub fn is_committed(&self) -> bool {
        matches!(self, RunState::Success | RunState::PartialSuccess)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts accumulated across stages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounts {
    pub pages: u64,
    pub extracted: u64,
    pub transformed: u64,
    pub transform_errors: u64,
    pub duplicates: u64,
    pub existing: u64,
    pub new_or_updated: u64,
    /// Recordings now in the bucket (fresh uploads plus already stored)
    pub uploaded: u64,
    pub already_stored: u64,
    pub skipped_no_url: u64,
    pub upload_failed: u64,
    pub validation_failures: u64,
    pub loaded: u64,
}

#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub window: RunWindow,
    pub state: RunState,
    pub counts: StageCounts,
    pub started_at: DateTime<Utc>,
    pub history: Vec<RunState>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            window: RunWindow::default(),
            state: RunState::Init,
            counts: StageCounts::default(),
            started_at: Utc::now(),
            history: vec![RunState::Init],
        }
    }

    /// Move to `next`. Terminal states are final.
    pub fn advance(&mut self, next: RunState) {
        if self.state.is_terminal() {
            return;
        }
        info!(run_id = %self.run_id, from = %self.state, to = %next, "Run state change");
        self.state = next;
        self.history.push(next);
    }

    /// Audit record for this run, with load counts still to be filled in
    pub fn audit_draft(&self) -> AuditRecord {
        let c = &self.counts;
        AuditRecord {
            run_id: self.run_id,
            window_start: self.window.start,
            window_end: self.window.end,
            extracted: c.extracted,
            transformed: c.transformed,
            existing: c.existing,
            new_or_updated: c.new_or_updated,
            transform_errors: c.transform_errors,
            uploaded: c.uploaded,
            failed: c.upload_failed,
            skipped_no_url: c.skipped_no_url,
            validation_failures: c.validation_failures,
            loaded: c.loaded,
            completed_at: Utc::now(),
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}
