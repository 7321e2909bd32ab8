//! Core data types flowing through a run
//!
//! `CallRecord` is the loosely shaped JSON object returned by the call
//! platform. Everything after the transformer works on [`NormalizedRow`],
//! which has a fixed schema and UTC timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::UploadError;

/// One call object as returned by the call-platform API
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallRecord(Map<String, Value>);

impl CallRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Build a record from any JSON value; non-objects yield an empty record.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    /// String field, with empty strings treated as absent
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    pub fn id(&self) -> Option<&str> {
        self.str_field("id")
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// Audio transfer state of a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    #[default]
    Pending,
    SkippedNoUrl,
    Uploaded,
    AlreadyStored,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::SkippedNoUrl => "skipped_no_url",
            UploadStatus::Uploaded => "uploaded",
            UploadStatus::AlreadyStored => "already_stored",
            UploadStatus::Failed => "failed",
        }
    }

    /// Whether nothing is left to transfer for this row. Rows stored with
    /// `false` here are re-selected by dedup on the next run.
    pub fn is_complete(&self) -> bool {
        matches!(
            self,
            UploadStatus::Uploaded | UploadStatus::AlreadyStored | UploadStatus::SkippedNoUrl
        )
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UploadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UploadStatus::Pending),
            "skipped_no_url" => Ok(UploadStatus::SkippedNoUrl),
            "uploaded" => Ok(UploadStatus::Uploaded),
            "already_stored" => Ok(UploadStatus::AlreadyStored),
            "failed" => Ok(UploadStatus::Failed),
            other => Err(format!("unknown upload status '{}'", other)),
        }
    }
}

/// Canonical call row written to the target table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRow {
    pub id: String,
    pub assistant_id: Option<String>,
    pub phone_number_id: Option<String>,
    pub call_type: Option<String>,
    pub org_id: Option<String>,
    pub campaign_id: Option<String>,
    pub status: Option<String>,
    pub ended_reason: Option<String>,
    pub phone_call_provider: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub duration_secs: Option<f64>,
    pub stereo_recording_url: Option<String>,
    pub recording_url: Option<String>,
    pub transcript: Option<String>,
    pub summary: Option<String>,
    pub cost: Option<f64>,
    pub customer: Value,
    pub assistant_phone_number: Value,
    pub analysis: Value,
    pub raw: Value,

    pub storage_path: String,
    pub upload_status: UploadStatus,
    pub signed_url: Option<String>,
    pub signed_url_expiry: Option<DateTime<Utc>>,
    pub audio_sha256: Option<String>,
    pub upload_error: Option<String>,
}

impl NormalizedRow {
    /// Row with only the identity fields set; used by the transformer as a base.
    pub fn new(id: impl Into<String>, updated_at: DateTime<Utc>) -> Self {
        let id = id.into();
        Self {
            storage_path: storage_path_for(&id),
            id,
            assistant_id: None,
            phone_number_id: None,
            call_type: None,
            org_id: None,
            campaign_id: None,
            status: None,
            ended_reason: None,
            phone_call_provider: None,
            created_at: None,
            started_at: None,
            ended_at: None,
            updated_at,
            duration_secs: None,
            stereo_recording_url: None,
            recording_url: None,
            transcript: None,
            summary: None,
            cost: None,
            customer: Value::Null,
            assistant_phone_number: Value::Null,
            analysis: Value::Null,
            raw: Value::Null,
            upload_status: UploadStatus::Pending,
            signed_url: None,
            signed_url_expiry: None,
            audio_sha256: None,
            upload_error: None,
        }
    }

    pub fn upload_complete(&self) -> bool {
        self.upload_status.is_complete()
    }

    /// Merge an upload outcome into the row
    pub fn apply_upload(&mut self, outcome: &UploadOutcome) {
        match outcome {
            UploadOutcome::SkippedNoUrl => {
                self.upload_status = UploadStatus::SkippedNoUrl;
                self.signed_url = None;
                self.signed_url_expiry = None;
            }
            UploadOutcome::Uploaded {
                signed_url,
                expires_at,
                sha256,
                ..
            } => {
                self.upload_status = UploadStatus::Uploaded;
                self.signed_url = Some(signed_url.clone());
                self.signed_url_expiry = Some(*expires_at);
                self.audio_sha256 = Some(sha256.clone());
                self.upload_error = None;
            }
            UploadOutcome::AlreadyStored {
                signed_url,
                expires_at,
            } => {
                self.upload_status = UploadStatus::AlreadyStored;
                self.signed_url = Some(signed_url.clone());
                self.signed_url_expiry = Some(*expires_at);
                self.upload_error = None;
            }
            UploadOutcome::Failed(err) => {
                self.upload_status = UploadStatus::Failed;
                self.signed_url = None;
                self.signed_url_expiry = None;
                self.upload_error = Some(err.to_string());
            }
        }
    }
}

/// Deterministic object key for a call's recording
pub fn storage_path_for(call_id: &str) -> String {
    format!("{}.mp3", call_id)
}

/// What happened to one row's audio
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    SkippedNoUrl,
    Uploaded {
        signed_url: String,
        expires_at: DateTime<Utc>,
        sha256: String,
        bytes: u64,
    },
    AlreadyStored {
        signed_url: String,
        expires_at: DateTime<Utc>,
    },
    Failed(UploadError),
}

/// Per-row upload result, one slot per batch position
#[derive(Debug, Clone, PartialEq)]
pub struct UploadResult {
    pub index: usize,
    pub call_id: String,
    pub outcome: UploadOutcome,
}

/// Incremental window `[start, end)` on the update timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl RunWindow {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    pub fn is_empty_range(&self) -> bool {
        matches!((self.start, self.end), (Some(s), Some(e)) if s >= e)
    }
}

impl std::fmt::Display for RunWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fmt = |ts: Option<DateTime<Utc>>| {
            ts.map(|t| callsync_common::time::to_api_string(&t))
                .unwrap_or_else(|| "*".to_string())
        };
        write!(f, "[{}, {})", fmt(self.start), fmt(self.end))
    }
}

/// Stored state of a call already present in the target table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExistingCall {
    pub updated_at: DateTime<Utc>,
    pub upload_complete: bool,
}

/// Provenance record written once per successful run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub run_id: Uuid,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub extracted: u64,
    pub transformed: u64,
    pub existing: u64,
    pub new_or_updated: u64,
    pub transform_errors: u64,
    pub uploaded: u64,
    pub failed: u64,
    pub skipped_no_url: u64,
    pub validation_failures: u64,
    pub loaded: u64,
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_call_record_ignores_blank_strings() {
        let record = CallRecord::from_value(json!({"id": "  ", "status": "ended", "cost": null}));
        assert_eq!(record.id(), None);
        assert_eq!(record.str_field("status"), Some("ended"));
        assert!(record.get("cost").is_none());
    }

    #[test]
    fn test_upload_status_completion() {
        assert!(UploadStatus::Uploaded.is_complete());
        assert!(UploadStatus::AlreadyStored.is_complete());
        assert!(UploadStatus::SkippedNoUrl.is_complete());
        assert!(!UploadStatus::Failed.is_complete());
        assert!(!UploadStatus::Pending.is_complete());
        assert_eq!("already_stored".parse::<UploadStatus>(), Ok(UploadStatus::AlreadyStored));
        assert!("done".parse::<UploadStatus>().is_err());
    }

    #[test]
    fn test_apply_failed_upload_clears_reference() {
        let ts = Utc.with_ymd_and_hms(2025, 10, 1, 12, 0, 0).unwrap();
        let mut row = NormalizedRow::new("c-1", ts);
        assert_eq!(row.storage_path, "c-1.mp3");

        row.apply_upload(&UploadOutcome::Uploaded {
            signed_url: "https://signed/c-1".to_string(),
            expires_at: ts,
            sha256: "ab".to_string(),
            bytes: 2,
        });
        assert_eq!(row.upload_status, UploadStatus::Uploaded);
        assert_eq!(row.signed_url.as_deref(), Some("https://signed/c-1"));

        row.apply_upload(&UploadOutcome::Failed(UploadError::Empty));
        assert_eq!(row.upload_status, UploadStatus::Failed);
        assert!(row.signed_url.is_none());
        assert_eq!(row.upload_error.as_deref(), Some("asset body is empty"));
    }

    #[test]
    fn test_window_display() {
        let start = Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap();
        let window = RunWindow::new(Some(start), None);
        assert_eq!(window.to_string(), "[2025-10-01T00:00:00.000Z, *)");
        assert!(!window.is_empty_range());
        assert!(RunWindow::new(Some(start), Some(start)).is_empty_range());
    }
}
