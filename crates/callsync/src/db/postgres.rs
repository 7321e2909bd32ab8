//! Postgres-backed call table and audit store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder, Row};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::{AuditStore, CallTable};
use crate::config::{DatabaseConfig, DEFAULT_CALLS_TABLE, DEFAULT_LOAD_BATCH_SIZE};
use crate::error::StoreError;
use crate::models::{AuditRecord, ExistingCall, NormalizedRow};

/// Audit table written once per successful run
pub const AUDIT_TABLE: &str = "etl_audit_runs";

/// Columns written by the upsert, in bind order. `id` is the conflict key.
const CALL_COLUMNS: &[&str] = &[
    "id",
    "assistant_id",
    "phone_number_id",
    "call_type",
    "org_id",
    "campaign_id",
    "status",
    "ended_reason",
    "phone_call_provider",
    "created_at",
    "started_at",
    "ended_at",
    "updated_at",
    "duration_secs",
    "stereo_recording_url",
    "recording_url",
    "transcript",
    "summary",
    "cost",
    "customer",
    "assistant_phone_number",
    "analysis",
    "raw",
    "storage_path",
    "upload_status",
    "upload_complete",
    "signed_url",
    "signed_url_expiry",
    "audio_sha256",
    "upload_error",
    "audit_timestamp",
];

/// Largest upsert chunk that stays under Postgres' 65535 bind parameters
pub const MAX_LOAD_BATCH_SIZE: usize = u16::MAX as usize / CALL_COLUMNS.len();

#[derive(Clone)]
pub struct PgCallStore {
    pool: PgPool,
    table: String,
    batch_size: usize,
}

impl PgCallStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await?;

        info!(table = %config.calls_table, "Connected to database");

        Ok(Self::from_pool(pool).with_table(config.calls_table.clone()))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            table: DEFAULT_CALLS_TABLE.to_string(),
            batch_size: DEFAULT_LOAD_BATCH_SIZE,
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, MAX_LOAD_BATCH_SIZE);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("Migrations applied");
        Ok(())
    }

    fn upsert_statement(&self) -> String {
        format!("INSERT INTO {} ({}) ", self.table, CALL_COLUMNS.join(", "))
    }

    fn conflict_clause() -> String {
        let updates: Vec<String> = CALL_COLUMNS
            .iter()
            .filter(|c| **c != "id")
            .map(|c| format!("{c} = EXCLUDED.{c}"))
            .collect();
        format!(" ON CONFLICT (id) DO UPDATE SET {}", updates.join(", "))
    }
}

fn json_or_null(value: &Value) -> Option<&Value> {
    (!value.is_null()).then_some(value)
}

#[async_trait]
impl CallTable for PgCallStore {
    #[instrument(skip(self, ids), fields(ids = ids.len()))]
    async fn existing(&self, ids: &[String]) -> Result<HashMap<String, ExistingCall>, StoreError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let sql = format!(
            "SELECT id, updated_at, upload_complete FROM {} WHERE id = ANY($1)",
            self.table
        );
        let rows = sqlx::query(&sql).bind(ids).fetch_all(&self.pool).await?;

        let mut found = HashMap::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
            let upload_complete: bool = row.try_get("upload_complete")?;
            found.insert(
                id,
                ExistingCall {
                    updated_at,
                    upload_complete,
                },
            );
        }

        debug!(found = found.len(), "Existence lookup finished");
        Ok(found)
    }

    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    async fn upsert(
        &self,
        rows: &[NormalizedRow],
        audit_timestamp: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;

        for chunk in rows.chunks(self.batch_size) {
            let mut query_builder: QueryBuilder<Postgres> =
                QueryBuilder::new(self.upsert_statement());

            query_builder.push_values(chunk.iter(), |mut b, row| {
                b.push_bind(&row.id)
                    .push_bind(&row.assistant_id)
                    .push_bind(&row.phone_number_id)
                    .push_bind(&row.call_type)
                    .push_bind(&row.org_id)
                    .push_bind(&row.campaign_id)
                    .push_bind(&row.status)
                    .push_bind(&row.ended_reason)
                    .push_bind(&row.phone_call_provider)
                    .push_bind(row.created_at)
                    .push_bind(row.started_at)
                    .push_bind(row.ended_at)
                    .push_bind(row.updated_at)
                    .push_bind(row.duration_secs)
                    .push_bind(&row.stereo_recording_url)
                    .push_bind(&row.recording_url)
                    .push_bind(&row.transcript)
                    .push_bind(&row.summary)
                    .push_bind(row.cost)
                    .push_bind(json_or_null(&row.customer))
                    .push_bind(json_or_null(&row.assistant_phone_number))
                    .push_bind(json_or_null(&row.analysis))
                    .push_bind(&row.raw)
                    .push_bind(&row.storage_path)
                    .push_bind(row.upload_status.as_str())
                    .push_bind(row.upload_complete())
                    .push_bind(&row.signed_url)
                    .push_bind(row.signed_url_expiry)
                    .push_bind(&row.audio_sha256)
                    .push_bind(&row.upload_error)
                    .push_bind(audit_timestamp);
            });
            query_builder.push(Self::conflict_clause());

            let result = query_builder.build().execute(&mut *tx).await?;
            written += result.rows_affected();
            debug!(chunk = chunk.len(), "Upserted chunk");
        }

        tx.commit().await?;

        info!(written, table = %self.table, "Upsert committed");
        Ok(written)
    }

    #[instrument(skip(self, signed_url))]
    async fn update_signed_url(
        &self,
        id: &str,
        signed_url: &str,
        expiry: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "UPDATE {} SET signed_url = $1, signed_url_expiry = $2 WHERE id = $3",
            self.table
        );
        let result = sqlx::query(&sql)
            .bind(signed_url)
            .bind(expiry)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "call '{}' not found in {}",
                id, self.table
            )));
        }
        Ok(())
    }

    async fn oldest_incomplete_upload(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let sql = format!(
            "SELECT MIN(updated_at) FROM {} WHERE upload_complete = FALSE",
            self.table
        );
        let oldest: Option<DateTime<Utc>> =
            sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(oldest)
    }
}

#[async_trait]
impl AuditStore for PgCallStore {
    async fn last_audit(&self) -> Result<Option<AuditRecord>, StoreError> {
        let sql = format!(
            "SELECT run_id, window_start, window_end, extracted, transformed, existing, \
             new_or_updated, transform_errors, uploaded, failed, skipped_no_url, \
             validation_failures, loaded, completed_at \
             FROM {} ORDER BY completed_at DESC LIMIT 1",
            AUDIT_TABLE
        );
        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let count = |name: &str| -> Result<u64, sqlx::Error> {
            let value: i64 = row.try_get(name)?;
            Ok(value.max(0) as u64)
        };

        Ok(Some(AuditRecord {
            run_id: row.try_get("run_id")?,
            window_start: row.try_get("window_start")?,
            window_end: row.try_get("window_end")?,
            extracted: count("extracted")?,
            transformed: count("transformed")?,
            existing: count("existing")?,
            new_or_updated: count("new_or_updated")?,
            transform_errors: count("transform_errors")?,
            uploaded: count("uploaded")?,
            failed: count("failed")?,
            skipped_no_url: count("skipped_no_url")?,
            validation_failures: count("validation_failures")?,
            loaded: count("loaded")?,
            completed_at: row.try_get("completed_at")?,
        }))
    }

    #[instrument(skip(self, record), fields(run_id = %record.run_id))]
    async fn record_audit(&self, record: &AuditRecord) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO {} (run_id, window_start, window_end, extracted, transformed, existing, \
             new_or_updated, transform_errors, uploaded, failed, skipped_no_url, \
             validation_failures, loaded, completed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
            AUDIT_TABLE
        );

        sqlx::query(&sql)
            .bind(record.run_id)
            .bind(record.window_start)
            .bind(record.window_end)
            .bind(record.extracted as i64)
            .bind(record.transformed as i64)
            .bind(record.existing as i64)
            .bind(record.new_or_updated as i64)
            .bind(record.transform_errors as i64)
            .bind(record.uploaded as i64)
            .bind(record.failed as i64)
            .bind(record.skipped_no_url as i64)
            .bind(record.validation_failures as i64)
            .bind(record.loaded as i64)
            .bind(record.completed_at)
            .execute(&self.pool)
            .await?;

        info!("Audit record written");
        Ok(())
    }
}
