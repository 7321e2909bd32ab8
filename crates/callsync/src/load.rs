//! Load stage
//!
//! Rows are checked against the required-field schema, written with one
//! conflict-resolving upsert and, once that commits, the run's audit record
//! is written. An upsert failure means nothing from the run is committed and
//! no audit record exists, so the next run retries the same window.

use chrono::{SubsecRound, Utc};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::db::{AuditStore, CallTable};
use crate::error::{LoadError, ValidationError};
use crate::models::{AuditRecord, NormalizedRow};

/// Fields every written row must carry
pub const REQUIRED_FIELDS: &[&str] = &["id", "status", "created_at", "raw"];

#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub loaded: u64,
    pub rejected: Vec<ValidationError>,
    pub audit: AuditRecord,
}

/// Check one row against [`REQUIRED_FIELDS`]
pub fn validate_row(row: &NormalizedRow) -> Result<(), ValidationError> {
    let mut missing = Vec::new();
    if row.id.trim().is_empty() {
        missing.push("id");
    }
    if row.status.as_deref().map_or(true, |s| s.trim().is_empty()) {
        missing.push("status");
    }
    if row.created_at.is_none() {
        missing.push("created_at");
    }
    if !row.raw.is_object() {
        missing.push("raw");
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ValidationError {
            call_id: row.id.clone(),
            missing,
        })
    }
}

/// Split rows into the write set and the rejected ones
pub fn partition_valid(rows: Vec<NormalizedRow>) -> (Vec<NormalizedRow>, Vec<ValidationError>) {
    let mut valid = Vec::with_capacity(rows.len());
    let mut rejected = Vec::new();
    for row in rows {
        match validate_row(&row) {
            Ok(()) => valid.push(row),
            Err(err) => {
                warn!(call_id = %err.call_id, missing = ?err.missing, "Row failed schema check");
                rejected.push(err);
            }
        }
    }
    (valid, rejected)
}

pub struct Loader {
    table: Arc<dyn CallTable>,
    audit: Arc<dyn AuditStore>,
}

impl Loader {
    pub fn new(table: Arc<dyn CallTable>, audit: Arc<dyn AuditStore>) -> Self {
        Self { table, audit }
    }

    /// Validate, upsert, then write `audit` completed with the load counts
    #[instrument(skip_all, fields(rows = rows.len(), run_id = %audit.run_id))]
    pub async fn load(
        &self,
        rows: Vec<NormalizedRow>,
        mut audit: AuditRecord,
    ) -> Result<LoadOutcome, LoadError> {
        let (valid, rejected) = partition_valid(rows);

        // Postgres keeps microseconds; truncating keeps the watermark exact on read-back
        let audit_timestamp = Utc::now().trunc_subsecs(6);
        let loaded = self
            .table
            .upsert(&valid, audit_timestamp)
            .await
            .map_err(LoadError::Upsert)?;

        info!(loaded, rejected = rejected.len(), "Rows upserted");

        audit.loaded = loaded;
        audit.validation_failures = rejected.len() as u64;
        audit.completed_at = Utc::now().trunc_subsecs(6);

        self.audit
            .record_audit(&audit)
            .await
            .map_err(LoadError::Audit)?;

        Ok(LoadOutcome {
            loaded,
            rejected,
            audit,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn valid_row(id: &str) -> NormalizedRow {
        let ts = Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap();
        let mut row = NormalizedRow::new(id, ts);
        row.status = Some("ended".to_string());
        row.created_at = Some(ts);
        row.raw = json!({"id": id});
        row
    }

    #[test]
    fn test_valid_row_passes() {
        assert!(validate_row(&valid_row("c-1")).is_ok());
    }

    #[test]
    fn test_missing_fields_are_named() {
        let mut row = valid_row("c-2");
        row.status = None;
        row.raw = json!(null);

        let err = validate_row(&row).unwrap_err();
        assert_eq!(err.call_id, "c-2");
        assert_eq!(err.missing, vec!["status", "raw"]);
    }

    #[test]
    fn test_blank_id_is_rejected() {
        let mut row = valid_row("c-3");
        row.id = String::new();
        let err = validate_row(&row).unwrap_err();
        assert_eq!(err.missing, vec!["id"]);
    }

    #[test]
    fn test_partition_keeps_order() {
        let mut bad = valid_row("b");
        bad.created_at = None;
        let (valid, rejected) = partition_valid(vec![valid_row("a"), bad, valid_row("c")]);
        let ids: Vec<&str> = valid.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].missing, vec!["created_at"]);
    }
}
