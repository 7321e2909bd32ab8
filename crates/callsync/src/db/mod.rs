//! Target table and audit store seams
//!
//! The pipeline talks to persistence only through these two traits.
//! [`postgres::PgCallStore`] implements both on one connection pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::error::StoreError;
use crate::models::{AuditRecord, ExistingCall, NormalizedRow};

pub mod postgres;

pub use postgres::PgCallStore;

/// Call rows keyed by identifier
#[async_trait]
pub trait CallTable: Send + Sync {
    /// Stored state for whichever of `ids` are already present
    async fn existing(&self, ids: &[String]) -> Result<HashMap<String, ExistingCall>, StoreError>;

    /// Insert-or-overwrite every row in one atomic write. Returns rows written.
    async fn upsert(
        &self,
        rows: &[NormalizedRow],
        audit_timestamp: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Replace the signed URL of one stored row
    async fn update_signed_url(
        &self,
        id: &str,
        signed_url: &str,
        expiry: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Earliest `updated_at` among rows whose audio is not stored yet
    async fn oldest_incomplete_upload(&self) -> Result<Option<DateTime<Utc>>, StoreError>;
}

/// Per-run provenance records
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Most recent record by completion time
    async fn last_audit(&self) -> Result<Option<AuditRecord>, StoreError>;

    async fn record_audit(&self, record: &AuditRecord) -> Result<(), StoreError>;
}
