//! Shared fixtures for callsync integration tests
//!
//! In-memory stand-ins for every external seam (call API, object store,
//! recording host, Postgres, failure ledger) so a whole run can be driven
//! without network or Docker. The Postgres-backed tests start a real
//! container through [`TestPostgres`] instead.

#![allow(dead_code)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use callsync::{
    config::{ApiConfig, PipelineConfig},
    db::{AuditStore, CallTable},
    error::{ExtractionError, StoreError, UploadError},
    extract::{CallPage, CallSource, Extractor, PageMetadata, PageQuery},
    models::{AuditRecord, CallRecord, ExistingCall, NormalizedRow},
    storage::{calculate_sha256, ObjectStore, StorageError, StoredObject},
    transform::Transformer,
    upload::{AudioSource, AudioUploader, FailureLedger, LedgerEntry, LedgerError},
    Pipeline,
};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;

pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,callsync=debug,sqlx=warn,testcontainers=info")
        }))
        .with_test_writer()
        .try_init();
}

/// 2025-01-15 at the given hour, UTC
pub fn ts(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 15, hour, 0, 0).unwrap()
}

/// Raw call object in the platform's wire shape
pub fn call(id: &str, updated_at: DateTime<Utc>, recording_url: Option<&str>) -> Value {
    let mut value = json!({
        "id": id,
        "assistantId": "asst-1",
        "type": "outboundPhoneCall",
        "orgId": "org-1",
        "status": "ended",
        "endedReason": "customer-ended-call",
        "createdAt": "2025-01-15T00:00:00.000Z",
        "startedAt": "2025-01-15T00:00:05.000Z",
        "endedAt": "2025-01-15T00:01:05.000Z",
        "updatedAt": updated_at.to_rfc3339(),
        "cost": 0.12,
        "customer": {"number": "+15550100"},
        "transcript": "hello",
    });
    if let Some(url) = recording_url {
        value["stereoRecordingUrl"] = json!(url);
    }
    value
}

// ============================================================================
// Call API
// ============================================================================

/// Serves fixed pages; `fail_on` turns one page number into an HTTP 500.
/// With `honouring_window` it filters on `updatedAt` like the platform does
/// and re-pages the survivors by the requested limit.
#[derive(Default)]
pub struct PagedSource {
    pages: Vec<Vec<Value>>,
    fail_on: Option<u32>,
    windowed: bool,
    pub queries: Mutex<Vec<PageQuery>>,
}

impl PagedSource {
    pub fn new(pages: Vec<Vec<Value>>) -> Self {
        Self {
            pages,
            ..Default::default()
        }
    }

    pub fn failing_on(mut self, page: u32) -> Self {
        self.fail_on = Some(page);
        self
    }

    pub fn honouring_window(mut self) -> Self {
        self.windowed = true;
        self
    }

    pub fn queries(&self) -> Vec<PageQuery> {
        self.queries.lock().unwrap().clone()
    }

    fn pages_for(&self, query: &PageQuery) -> Vec<Vec<Value>> {
        if !self.windowed {
            return self.pages.clone();
        }

        let window = query.window;
        let matching: Vec<Value> = self
            .pages
            .iter()
            .flatten()
            .filter(|value| {
                let updated = value["updatedAt"]
                    .as_str()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|t| t.with_timezone(&Utc));
                match updated {
                    Some(t) => {
                        window.start.is_none_or(|start| t >= start)
                            && window.end.is_none_or(|end| t < end)
                    }
                    None => true,
                }
            })
            .cloned()
            .collect();

        matching
            .chunks(query.limit.max(1) as usize)
            .map(<[Value]>::to_vec)
            .collect()
    }
}

#[async_trait]
impl CallSource for PagedSource {
    async fn fetch_page(&self, query: &PageQuery) -> Result<CallPage, ExtractionError> {
        self.queries.lock().unwrap().push(*query);

        if self.fail_on == Some(query.page) {
            return Err(ExtractionError::Status {
                page: query.page,
                status: 500,
                body: "internal error".to_string(),
            });
        }

        let pages = self.pages_for(query);
        let total: usize = pages.iter().map(Vec::len).sum();
        let results = pages
            .get(query.page as usize - 1)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(CallRecord::from_value)
            .collect();

        Ok(CallPage {
            results,
            metadata: PageMetadata {
                total_items: Some(total as u64),
                current_page: Some(query.page),
                ..Default::default()
            },
        })
    }
}

// ============================================================================
// Object store and recording host
// ============================================================================

#[derive(Default)]
pub struct MemoryStore {
    pub objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn with_object(self, key: &str, data: &[u8]) -> Self {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
        self
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.objects.lock().unwrap().contains_key(key))
    }

    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        _content_type: &str,
    ) -> Result<StoredObject, StorageError> {
        let stored = StoredObject {
            key: key.to_string(),
            checksum: calculate_sha256(&data),
            size: data.len() as u64,
        };
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(stored)
    }

    async fn sign(&self, key: &str, expires_in: Duration) -> Result<String, StorageError> {
        Ok(format!(
            "https://bucket.test/{}?X-Amz-Expires={}",
            key,
            expires_in.as_secs()
        ))
    }
}

/// Recording host that only knows the URLs it was given; others 404
#[derive(Default)]
pub struct MapAudio {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
}

impl MapAudio {
    pub fn with(self, url: &str, body: &[u8]) -> Self {
        self.serve(url, body);
        self
    }

    /// Start answering `url`, e.g. once a host has recovered
    pub fn serve(&self, url: &str, body: &[u8]) {
        self.bodies
            .lock()
            .unwrap()
            .insert(url.to_string(), body.to_vec());
    }
}

#[async_trait]
impl AudioSource for MapAudio {
    async fn fetch(&self, url: &str, _max_bytes: u64) -> Result<Vec<u8>, UploadError> {
        self.bodies
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or(UploadError::SourceStatus(404))
    }
}

// ============================================================================
// Target table and audit store
// ============================================================================

#[derive(Default)]
pub struct MemoryDb {
    pub rows: Mutex<HashMap<String, NormalizedRow>>,
    pub audits: Mutex<Vec<AuditRecord>>,
    pub upsert_calls: Mutex<Vec<Vec<String>>>,
    fail_upsert: AtomicBool,
    fail_lookup: AtomicBool,
}

impl MemoryDb {
    pub fn with_row(self, row: NormalizedRow) -> Self {
        self.rows.lock().unwrap().insert(row.id.clone(), row);
        self
    }

    pub fn with_audit(self, record: AuditRecord) -> Self {
        self.audits.lock().unwrap().push(record);
        self
    }

    pub fn fail_upserts(&self) {
        self.fail_upsert.store(true, Ordering::SeqCst);
    }

    pub fn fail_lookups(&self) {
        self.fail_lookup.store(true, Ordering::SeqCst);
    }

    pub fn row(&self, id: &str) -> Option<NormalizedRow> {
        self.rows.lock().unwrap().get(id).cloned()
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn audits(&self) -> Vec<AuditRecord> {
        self.audits.lock().unwrap().clone()
    }
}

#[async_trait]
impl CallTable for MemoryDb {
    async fn existing(&self, ids: &[String]) -> Result<HashMap<String, ExistingCall>, StoreError> {
        if self.fail_lookup.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("lookup refused".to_string()));
        }
        let rows = self.rows.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| {
                rows.get(id).map(|row| {
                    (
                        id.clone(),
                        ExistingCall {
                            updated_at: row.updated_at,
                            upload_complete: row.upload_complete(),
                        },
                    )
                })
            })
            .collect())
    }

    async fn upsert(
        &self,
        rows: &[NormalizedRow],
        _audit_timestamp: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        if self.fail_upsert.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("upsert refused".to_string()));
        }
        self.upsert_calls
            .lock()
            .unwrap()
            .push(rows.iter().map(|r| r.id.clone()).collect());

        let mut stored = self.rows.lock().unwrap();
        for row in rows {
            stored.insert(row.id.clone(), row.clone());
        }
        Ok(rows.len() as u64)
    }

    async fn update_signed_url(
        &self,
        id: &str,
        signed_url: &str,
        expiry: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut stored = self.rows.lock().unwrap();
        let row = stored
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        row.signed_url = Some(signed_url.to_string());
        row.signed_url_expiry = Some(expiry);
        Ok(())
    }

    async fn oldest_incomplete_upload(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|row| !row.upload_complete())
            .map(|row| row.updated_at)
            .min())
    }
}

#[async_trait]
impl AuditStore for MemoryDb {
    async fn last_audit(&self) -> Result<Option<AuditRecord>, StoreError> {
        Ok(self
            .audits
            .lock()
            .unwrap()
            .iter()
            .max_by_key(|a| a.completed_at)
            .cloned())
    }

    async fn record_audit(&self, record: &AuditRecord) -> Result<(), StoreError> {
        self.audits.lock().unwrap().push(record.clone());
        Ok(())
    }
}

// ============================================================================
// Failure ledger
// ============================================================================

#[derive(Default)]
pub struct RecordingLedger {
    pub entries: Mutex<Vec<LedgerEntry>>,
}

impl FailureLedger for RecordingLedger {
    fn append(&self, entries: &[LedgerEntry]) -> Result<(), LedgerError> {
        self.entries.lock().unwrap().extend_from_slice(entries);
        Ok(())
    }
}

// ============================================================================
// Pipeline assembly
// ============================================================================

pub fn api_config() -> ApiConfig {
    ApiConfig {
        api_key: "test-key".to_string(),
        base_url: "http://localhost/call".to_string(),
        page_limit: 2,
        max_total_items: 10_000,
        page_delay_ms: 0,
        timeout_secs: 5,
    }
}

/// Everything a test needs to drive and then inspect one pipeline
pub struct Harness {
    pub source: Arc<PagedSource>,
    pub store: Arc<MemoryStore>,
    pub audio: Arc<MapAudio>,
    pub db: Arc<MemoryDb>,
    pub ledger: Arc<RecordingLedger>,
    pub pipeline: Pipeline,
}

impl Harness {
    pub fn new(source: PagedSource, store: MemoryStore, audio: MapAudio, db: MemoryDb) -> Self {
        let source = Arc::new(source);
        let store = Arc::new(store);
        let audio = Arc::new(audio);
        let db = Arc::new(db);
        let ledger = Arc::new(RecordingLedger::default());

        let pipeline = Pipeline::new(
            Extractor::new(source.clone(), &api_config()),
            Transformer::new(2),
            AudioUploader::new(store.clone(), audio.clone(), &PipelineConfig::default())
                .with_ledger(ledger.clone()),
            db.clone(),
            db.clone(),
        );

        Self {
            source,
            store,
            audio,
            db,
            ledger,
            pipeline,
        }
    }
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    /// Start a PostgreSQL container with migrations applied
    pub async fn start() -> Result<Self> {
        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let url = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
