//! Configuration management
//!
//! Values come from the process environment (after loading `.env` through
//! `dotenvy`), fall back to the `DEFAULT_*` constants below, and are checked
//! by [`Config::validate`] before any stage runs.

use callsync_common::logging::{LogConfig, LogLevel};
use callsync_common::{CallsyncError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::db::postgres::MAX_LOAD_BATCH_SIZE;
use crate::storage::config::StorageConfig;

// ============================================================================
// Call Platform API
// ============================================================================

/// Default list endpoint of the call platform.
pub const DEFAULT_API_BASE_URL: &str = "https://api.vapi.ai/v2/call";

/// Default number of calls requested per page.
pub const DEFAULT_PAGE_LIMIT: u32 = 1000;

/// Default ceiling on `totalItems` for a single window.
pub const DEFAULT_MAX_TOTAL_ITEMS: u64 = 10_000;

/// Default delay between page requests in milliseconds.
pub const DEFAULT_PAGE_DELAY_MS: u64 = 300;

/// Default per-request timeout for page fetches in seconds.
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Database
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/callsync";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default target table for call rows.
pub const DEFAULT_CALLS_TABLE: &str = "ai_calls";

// ============================================================================
// Pipeline
// ============================================================================

/// Default size of the audio upload worker pool.
pub const DEFAULT_UPLOAD_WORKERS: usize = 4;

/// Default timeout for each audio fetch / store / sign call in seconds.
pub const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 30;

/// Default maximum accepted recording size (200 MiB).
pub const DEFAULT_MAX_AUDIO_BYTES: u64 = 200 * 1024 * 1024;

/// Default signed URL lifetime in hours (7 days).
pub const DEFAULT_SIGNED_URL_EXPIRY_HOURS: u64 = 168;

/// Longest lifetime a presigned URL may have.
pub const MAX_SIGNED_URL_EXPIRY_HOURS: u64 = 168;

/// Default rows per upsert statement.
pub const DEFAULT_LOAD_BATCH_SIZE: usize = 1000;

/// Default ids per existence lookup query.
pub const DEFAULT_EXISTENCE_LOOKUP_BATCH_SIZE: usize = 100;

/// Default failure ledger location.
pub const DEFAULT_FAILED_UPLOADS_LEDGER: &str = "failed_uploads.csv";

/// Full configuration for a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub pipeline: PipelineConfig,
}

/// Call-platform API configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub api_key: String,
    pub base_url: String,
    pub page_limit: u32,
    pub max_total_items: u64,
    pub page_delay_ms: u64,
    pub timeout_secs: u64,
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("page_limit", &self.page_limit)
            .field("max_total_items", &self.max_total_items)
            .field("page_delay_ms", &self.page_delay_ms)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
    pub calls_table: String,
}

/// Stage tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub upload_workers: usize,
    pub upload_timeout_secs: u64,
    pub max_audio_bytes: u64,
    pub signed_url_expiry_hours: u64,
    pub load_batch_size: usize,
    pub existence_lookup_batch_size: usize,
    pub failed_uploads_ledger: PathBuf,
    pub snapshot_path: Option<PathBuf>,
}

impl PipelineConfig {
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn signed_url_expiry(&self) -> Duration {
        Duration::from_secs(self.signed_url_expiry_hours * 3600)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            upload_workers: DEFAULT_UPLOAD_WORKERS,
            upload_timeout_secs: DEFAULT_UPLOAD_TIMEOUT_SECS,
            max_audio_bytes: DEFAULT_MAX_AUDIO_BYTES,
            signed_url_expiry_hours: DEFAULT_SIGNED_URL_EXPIRY_HOURS,
            load_batch_size: DEFAULT_LOAD_BATCH_SIZE,
            existence_lookup_batch_size: DEFAULT_EXISTENCE_LOOKUP_BATCH_SIZE,
            failed_uploads_ledger: PathBuf::from(DEFAULT_FAILED_UPLOADS_LEDGER),
            snapshot_path: None,
        }
    }
}

/// Unset or blank means the default; anything else must parse.
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|e| {
            CallsyncError::config(format!("{} has invalid value '{}': {}", key, raw.trim(), e))
        }),
        _ => Ok(default),
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Load `.env`, or `path` when given, into the process environment.
/// Variables that are already set win. A missing default `.env` is fine.
pub fn load_env_file(path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => dotenvy::from_path(path).map_err(|e| {
            CallsyncError::config(format!("could not read {}: {}", path.display(), e))
        }),
        None => {
            dotenvy::dotenv().ok();
            Ok(())
        }
    }
}

/// Log settings for the binary: `-v` picks the base level, `LOG_*`
/// variables override it. Call after [`load_env_file`].
pub fn log_config(verbose: bool) -> Result<LogConfig> {
    let level = if verbose { LogLevel::Debug } else { LogLevel::Info };

    LogConfig::default()
        .with_level(level)
        .with_file_prefix("callsync")
        .with_directives("sqlx=warn,aws_smithy_runtime=warn,hyper=warn")
        .merge_env()
}

/// Signed URL lifetime for `hours`, within the presigning limit
pub fn signed_url_expiry_for(hours: u64) -> Result<Duration> {
    if hours == 0 || hours > MAX_SIGNED_URL_EXPIRY_HOURS {
        return Err(CallsyncError::config(format!(
            "URL expiry must be between 1 and {} hours, got {}",
            MAX_SIGNED_URL_EXPIRY_HOURS, hours
        )));
    }
    hours
        .checked_mul(3600)
        .map(Duration::from_secs)
        .ok_or_else(|| CallsyncError::config(format!("URL expiry of {} hours overflows", hours)))
}

impl Config {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> Result<Self> {
        load_env_file(None)?;

        let config = Config {
            api: ApiConfig {
                api_key: std::env::var("VAPI_API_KEY").unwrap_or_default(),
                base_url: env_string("VAPI_BASE_URL", DEFAULT_API_BASE_URL),
                page_limit: env_or("VAPI_PAGE_LIMIT", DEFAULT_PAGE_LIMIT)?,
                max_total_items: env_or("VAPI_MAX_TOTAL_ITEMS", DEFAULT_MAX_TOTAL_ITEMS)?,
                page_delay_ms: env_or("VAPI_PAGE_DELAY_MS", DEFAULT_PAGE_DELAY_MS)?,
                timeout_secs: env_or("VAPI_TIMEOUT_SECS", DEFAULT_API_TIMEOUT_SECS)?,
            },
            storage: StorageConfig::from_env(),
            database: DatabaseConfig {
                url: env_string("DATABASE_URL", DEFAULT_DATABASE_URL),
                max_connections: env_or(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                )?,
                connect_timeout_secs: env_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                )?,
                calls_table: env_string("CALLS_TABLE", DEFAULT_CALLS_TABLE),
            },
            pipeline: PipelineConfig {
                upload_workers: env_or("UPLOAD_WORKERS", DEFAULT_UPLOAD_WORKERS)?,
                upload_timeout_secs: env_or("UPLOAD_TIMEOUT_SECS", DEFAULT_UPLOAD_TIMEOUT_SECS)?,
                max_audio_bytes: env_or("MAX_AUDIO_BYTES", DEFAULT_MAX_AUDIO_BYTES)?,
                signed_url_expiry_hours: env_or(
                    "SIGNED_URL_EXPIRY_HOURS",
                    DEFAULT_SIGNED_URL_EXPIRY_HOURS,
                )?,
                load_batch_size: env_or("LOAD_BATCH_SIZE", DEFAULT_LOAD_BATCH_SIZE)?,
                existence_lookup_batch_size: env_or(
                    "EXISTENCE_LOOKUP_BATCH_SIZE",
                    DEFAULT_EXISTENCE_LOOKUP_BATCH_SIZE,
                )?,
                failed_uploads_ledger: PathBuf::from(env_string(
                    "FAILED_UPLOADS_LEDGER",
                    DEFAULT_FAILED_UPLOADS_LEDGER,
                )),
                snapshot_path: std::env::var("SNAPSHOT_PATH")
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .map(PathBuf::from),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.api.api_key.trim().is_empty() {
            return Err(CallsyncError::config("VAPI_API_KEY must be set"));
        }
        if self.api.page_limit == 0 {
            return Err(CallsyncError::config("VAPI_PAGE_LIMIT must be greater than 0"));
        }
        if self.api.timeout_secs == 0 {
            return Err(CallsyncError::config("VAPI_TIMEOUT_SECS must be greater than 0"));
        }

        if self.storage.bucket.trim().is_empty() {
            return Err(CallsyncError::config("S3_BUCKET cannot be empty"));
        }

        if self.database.url.is_empty() {
            return Err(CallsyncError::config("Database URL cannot be empty"));
        }
        if self.database.max_connections == 0 {
            return Err(CallsyncError::config(
                "Database max_connections must be greater than 0",
            ));
        }
        if !is_identifier(&self.database.calls_table) {
            return Err(CallsyncError::config(format!(
                "CALLS_TABLE '{}' is not a valid table name",
                self.database.calls_table
            )));
        }

        let pipeline = &self.pipeline;
        if pipeline.upload_workers == 0 {
            return Err(CallsyncError::config("UPLOAD_WORKERS must be greater than 0"));
        }
        if pipeline.upload_timeout_secs == 0 {
            return Err(CallsyncError::config(
                "UPLOAD_TIMEOUT_SECS must be greater than 0",
            ));
        }
        if pipeline.signed_url_expiry_hours == 0 {
            return Err(CallsyncError::config(
                "SIGNED_URL_EXPIRY_HOURS must be greater than 0",
            ));
        }
        // SigV4 presigned URLs are capped at seven days
        if pipeline.signed_url_expiry_hours > MAX_SIGNED_URL_EXPIRY_HOURS {
            return Err(CallsyncError::config(format!(
                "SIGNED_URL_EXPIRY_HOURS must be at most {}",
                MAX_SIGNED_URL_EXPIRY_HOURS
            )));
        }
        if pipeline.load_batch_size == 0 || pipeline.existence_lookup_batch_size == 0 {
            return Err(CallsyncError::config("Batch sizes must be greater than 0"));
        }
        if pipeline.load_batch_size > MAX_LOAD_BATCH_SIZE {
            return Err(CallsyncError::config(format!(
                "LOAD_BATCH_SIZE must be at most {}",
                MAX_LOAD_BATCH_SIZE
            )));
        }

        if self.api.page_limit as u64 > self.api.max_total_items {
            tracing::warn!(
                page_limit = self.api.page_limit,
                max_total_items = self.api.max_total_items,
                "Page limit exceeds the window ceiling"
            );
        }

        Ok(())
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
