//! Transformation stage
//!
//! Maps raw call objects onto [`NormalizedRow`] and splits the batch into
//! rows that still need work and rows the target table already holds.
//! Normalisation and classification are pure; only the existence lookup
//! touches the database.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};

use crate::db::CallTable;
use crate::error::{StoreError, TransformError};
use crate::models::{CallRecord, ExistingCall, NormalizedRow};
use callsync_common::time::parse_utc;

/// Result of transforming one extracted batch
#[derive(Debug, Clone, Default)]
pub struct TransformOutcome {
    /// Rows classified new or updated, in extraction order
    pub rows: Vec<NormalizedRow>,
    /// Rows produced by normalisation, before dedup against the table
    pub transformed: usize,
    pub existing: usize,
    pub duplicates: usize,
    pub errors: Vec<TransformError>,
}

impl TransformOutcome {
    pub fn new_or_updated(&self) -> usize {
        self.rows.len()
    }
}

/// Rows that survived normalisation
#[derive(Debug, Clone, Default)]
pub struct Normalized {
    pub rows: Vec<NormalizedRow>,
    pub duplicates: usize,
    pub errors: Vec<TransformError>,
}

pub struct Transformer {
    lookup_batch_size: usize,
}

impl Transformer {
    pub fn new(lookup_batch_size: usize) -> Self {
        Self {
            lookup_batch_size: lookup_batch_size.max(1),
        }
    }

    /// Normalise, look up stored state in chunks, then classify
    #[instrument(skip_all, fields(records = records.len()))]
    pub async fn transform(
        &self,
        records: &[CallRecord],
        table: &dyn CallTable,
    ) -> Result<TransformOutcome, StoreError> {
        let normalized = normalize_all(records);

        let ids: Vec<String> = normalized.rows.iter().map(|r| r.id.clone()).collect();
        let mut existing = HashMap::new();
        for chunk in ids.chunks(self.lookup_batch_size) {
            existing.extend(table.existing(chunk).await?);
        }
        info!(
            checked = ids.len(),
            found = existing.len(),
            "Looked up stored calls"
        );

        Ok(classify(normalized, &existing))
    }
}

/// Transform against an already known set of stored calls
pub fn transform_with(
    records: &[CallRecord],
    existing: &HashMap<String, ExistingCall>,
) -> TransformOutcome {
    classify(normalize_all(records), existing)
}

/// Normalise every record, dropping malformed ones and collapsing repeated ids
pub fn normalize_all(records: &[CallRecord]) -> Normalized {
    let mut out = Normalized::default();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for (index, record) in records.iter().enumerate() {
        let row = match normalize_record(index, record) {
            Ok(row) => row,
            Err(err) => {
                warn!(index, call_id = ?err.call_id, reason = %err.reason, "Dropping record");
                out.errors.push(err);
                continue;
            }
        };

        match positions.get(&row.id) {
            Some(&pos) => {
                out.duplicates += 1;
                // Pages can shift while paginating; keep the newest copy
                if row.updated_at > out.rows[pos].updated_at {
                    out.rows[pos] = row;
                }
            }
            None => {
                positions.insert(row.id.clone(), out.rows.len());
                out.rows.push(row);
            }
        }
    }

    if out.duplicates > 0 {
        warn!(duplicates = out.duplicates, "Collapsed repeated call ids");
    }
    out
}

fn classify(normalized: Normalized, existing: &HashMap<String, ExistingCall>) -> TransformOutcome {
    let transformed = normalized.rows.len();
    let mut outcome = TransformOutcome {
        transformed,
        duplicates: normalized.duplicates,
        errors: normalized.errors,
        ..Default::default()
    };

    for row in normalized.rows {
        if is_existing(&row, existing.get(&row.id)) {
            outcome.existing += 1;
        } else {
            outcome.rows.push(row);
        }
    }

    info!(
        transformed,
        existing = outcome.existing,
        new_or_updated = outcome.rows.len(),
        errors = outcome.errors.len(),
        "Transform complete"
    );
    outcome
}

/// A stored call is skipped only when its audio is done and the incoming
/// copy is not newer. Equal timestamps count as already applied.
pub fn is_existing(row: &NormalizedRow, stored: Option<&ExistingCall>) -> bool {
    match stored {
        Some(stored) => stored.upload_complete && row.updated_at <= stored.updated_at,
        None => false,
    }
}

/// Map one raw call object onto the row schema
pub fn normalize_record(index: usize, record: &CallRecord) -> Result<NormalizedRow, TransformError> {
    let reject = |call_id: Option<&str>, reason: String| TransformError {
        index,
        call_id: call_id.map(str::to_string),
        reason,
    };

    let id = record
        .id()
        .ok_or_else(|| reject(None, "missing id".to_string()))?;
    let updated_raw = record
        .str_field("updatedAt")
        .ok_or_else(|| reject(Some(id), "missing updatedAt".to_string()))?;
    let updated_at =
        parse_utc(updated_raw).map_err(|e| reject(Some(id), format!("bad updatedAt: {}", e)))?;

    let started_at = optional_ts(record, id, "startedAt");
    let ended_at = optional_ts(record, id, "endedAt");

    let mut row = NormalizedRow::new(id, updated_at);
    row.assistant_id = string(record, "assistantId");
    row.phone_number_id = string(record, "phoneNumberId");
    row.call_type = string(record, "type");
    row.org_id = string(record, "orgId");
    row.campaign_id = string(record, "campaignId");
    row.status = string(record, "status");
    row.ended_reason = string(record, "endedReason");
    row.phone_call_provider = string(record, "phoneCallProvider");
    row.created_at = optional_ts(record, id, "createdAt");
    row.started_at = started_at;
    row.ended_at = ended_at;
    row.duration_secs = duration_secs(started_at, ended_at);
    row.stereo_recording_url = string_or_artifact(record, "stereoRecordingUrl");
    row.recording_url = string_or_artifact(record, "recordingUrl");
    row.transcript = string_or_artifact(record, "transcript");
    row.summary = string(record, "summary");
    row.cost = record.get("cost").and_then(Value::as_f64);
    row.customer = json(record, "customer");
    row.assistant_phone_number = json(record, "assistantPhoneNumber");
    row.analysis = json(record, "analysis");
    row.raw = Value::Object(record.fields().clone());

    Ok(row)
}

fn string(record: &CallRecord, key: &str) -> Option<String> {
    record.str_field(key).map(str::to_string)
}

/// Newer payloads nest recordings and transcripts under `artifact`
fn string_or_artifact(record: &CallRecord, key: &str) -> Option<String> {
    string(record, key).or_else(|| {
        record
            .get("artifact")
            .and_then(|artifact| artifact.get(key))
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
    })
}

fn json(record: &CallRecord, key: &str) -> Value {
    record.get(key).cloned().unwrap_or(Value::Null)
}

fn optional_ts(record: &CallRecord, id: &str, key: &str) -> Option<DateTime<Utc>> {
    let raw = record.str_field(key)?;
    match parse_utc(raw) {
        Ok(ts) => Some(ts),
        Err(e) => {
            debug!(call_id = id, field = key, error = %e, "Ignoring unparseable timestamp");
            None
        }
    }
}

fn duration_secs(started: Option<DateTime<Utc>>, ended: Option<DateTime<Utc>>) -> Option<f64> {
    let millis = (ended? - started?).num_milliseconds();
    (millis >= 0).then(|| millis as f64 / 1000.0)
}
