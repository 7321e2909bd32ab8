//! Optional CSV snapshot of the post-upload batch, for diagnostics

use serde::Serialize;
use std::path::Path;
use tracing::debug;

use crate::models::NormalizedRow;

#[derive(Serialize)]
struct SnapshotRow<'a> {
    id: &'a str,
    status: Option<&'a str>,
    created_at: Option<String>,
    updated_at: String,
    duration_secs: Option<f64>,
    stereo_recording_url: Option<&'a str>,
    storage_path: &'a str,
    upload_status: &'static str,
    signed_url: Option<&'a str>,
    signed_url_expiry: Option<String>,
    upload_error: Option<&'a str>,
}

impl<'a> From<&'a NormalizedRow> for SnapshotRow<'a> {
    fn from(row: &'a NormalizedRow) -> Self {
        Self {
            id: &row.id,
            status: row.status.as_deref(),
            created_at: row.created_at.map(|t| t.to_rfc3339()),
            updated_at: row.updated_at.to_rfc3339(),
            duration_secs: row.duration_secs,
            stereo_recording_url: row.stereo_recording_url.as_deref(),
            storage_path: &row.storage_path,
            upload_status: row.upload_status.as_str(),
            signed_url: row.signed_url.as_deref(),
            signed_url_expiry: row.signed_url_expiry.map(|t| t.to_rfc3339()),
            upload_error: row.upload_error.as_deref(),
        }
    }
}

/// Overwrite `path` with one line per row. Returns rows written.
pub fn write_snapshot(path: &Path, rows: &[NormalizedRow]) -> Result<usize, csv::Error> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(SnapshotRow::from(row))?;
    }
    writer.flush()?;

    debug!(path = %path.display(), rows = rows.len(), "Wrote batch snapshot");
    Ok(rows.len())
}
