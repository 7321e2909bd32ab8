//! UTC timestamp helpers
//!
//! Every timestamp that crosses a stage boundary is a `DateTime<Utc>`. These
//! helpers accept the shapes the call platform and the CLI produce: RFC 3339
//! with any offset, and naive `YYYY-MM-DDTHH:MM:SS[.fff]` which is taken as UTC.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

use crate::error::{CallsyncError, Result};

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse a timestamp and normalise it to UTC.
pub fn parse_utc(value: &str) -> Result<DateTime<Utc>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CallsyncError::InvalidTimestamp {
            value: value.to_string(),
            reason: "empty".to_string(),
        });
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(naive.and_utc());
        }
    }

    Err(CallsyncError::InvalidTimestamp {
        value: value.to_string(),
        reason: "expected RFC 3339 or YYYY-MM-DDTHH:MM:SS".to_string(),
    })
}

/// Render a timestamp the way the call platform expects it in query strings.
pub fn to_api_string(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
