//! Audio upload stage
//!
//! Copies each row's stereo recording into the bucket under `{id}.mp3` and
//! attaches a signed URL. Rows are processed by a bounded pool; every row
//! owns one result slot, so a failure on one row never touches another.
//! Failed rows keep flowing to the loader with no storage reference and are
//! appended to the failure ledger. Nothing is retried within a run.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::config::PipelineConfig;
use crate::error::{UploadError, UploadStage};
use crate::models::{NormalizedRow, UploadOutcome, UploadResult};
use crate::storage::{ObjectStore, AUDIO_CONTENT_TYPE};

pub mod fetch;
pub mod ledger;

pub use fetch::{AudioSource, HttpAudioSource};
pub use ledger::{CsvFailureLedger, FailureLedger, LedgerEntry, LedgerError};

/// Outcome counts for one upload pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadCounts {
    pub total: usize,
    pub uploaded: usize,
    pub already_stored: usize,
    pub skipped_no_url: usize,
    pub failed: usize,
}

impl UploadCounts {
    /// Rows whose recording is now in the bucket
    pub fn succeeded(&self) -> usize {
        self.uploaded + self.already_stored
    }

    fn record(&mut self, outcome: &UploadOutcome) {
        self.total += 1;
        match outcome {
            UploadOutcome::SkippedNoUrl => self.skipped_no_url += 1,
            UploadOutcome::Uploaded { .. } => self.uploaded += 1,
            UploadOutcome::AlreadyStored { .. } => self.already_stored += 1,
            UploadOutcome::Failed(_) => self.failed += 1,
        }
    }
}

/// Per-row results in batch order, plus counts
#[derive(Debug, Clone, Default)]
pub struct UploadReport {
    pub results: Vec<UploadResult>,
    pub counts: UploadCounts,
}

pub struct AudioUploader {
    store: Arc<dyn ObjectStore>,
    source: Arc<dyn AudioSource>,
    ledger: Option<Arc<dyn FailureLedger>>,
    workers: usize,
    timeout: Duration,
    max_bytes: u64,
    url_expiry: Duration,
}

impl AudioUploader {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        source: Arc<dyn AudioSource>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            store,
            source,
            ledger: None,
            workers: config.upload_workers.max(1),
            timeout: config.upload_timeout(),
            max_bytes: config.max_audio_bytes,
            url_expiry: config.signed_url_expiry(),
        }
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn FailureLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Transfer every row's recording and merge the outcome into the row
    #[instrument(skip_all, fields(rows = rows.len(), workers = self.workers))]
    pub async fn upload(&self, rows: &mut [NormalizedRow]) -> UploadReport {
        info!("Starting audio uploads");

        let jobs: Vec<(usize, String, String, Option<String>)> = rows
            .iter()
            .enumerate()
            .map(|(index, row)| {
                (
                    index,
                    row.id.clone(),
                    row.storage_path.clone(),
                    row.stereo_recording_url.clone(),
                )
            })
            .collect();

        let mut slots: Vec<Option<UploadResult>> = vec![None; rows.len()];
        let mut results = stream::iter(jobs)
            .map(|(index, call_id, key, url)| async move {
                let outcome = self.process(&call_id, &key, url.as_deref()).await;
                UploadResult {
                    index,
                    call_id,
                    outcome,
                }
            })
            .buffer_unordered(self.workers);

        while let Some(result) = results.next().await {
            if let UploadOutcome::Failed(err) = &result.outcome {
                warn!(call_id = %result.call_id, stage = err.stage().as_str(), error = %err, "Upload failed");
            }
            let index = result.index;
            slots[index] = Some(result);
        }
        drop(results);

        let mut report = UploadReport::default();
        for (row, slot) in rows.iter_mut().zip(slots) {
            let result = slot.unwrap_or_else(|| UploadResult {
                index: report.results.len(),
                call_id: row.id.clone(),
                outcome: UploadOutcome::Failed(UploadError::Fetch("no result produced".into())),
            });
            row.apply_upload(&result.outcome);
            report.counts.record(&result.outcome);
            report.results.push(result);
        }

        self.write_ledger(rows, &report.results);

        info!(
            uploaded = report.counts.uploaded,
            already_stored = report.counts.already_stored,
            skipped_no_url = report.counts.skipped_no_url,
            failed = report.counts.failed,
            "Audio uploads complete"
        );
        report
    }

    async fn process(&self, call_id: &str, key: &str, url: Option<&str>) -> UploadOutcome {
        let Some(url) = url.filter(|u| !u.trim().is_empty()) else {
            debug!(call_id, "No recording url, skipping");
            return UploadOutcome::SkippedNoUrl;
        };

        match self.transfer(call_id, key, url).await {
            Ok(outcome) => outcome,
            Err(err) => UploadOutcome::Failed(err),
        }
    }

    async fn transfer(
        &self,
        call_id: &str,
        key: &str,
        url: &str,
    ) -> Result<UploadOutcome, UploadError> {
        let already_stored = self
            .within(UploadStage::Store, async {
                self.store
                    .exists(key)
                    .await
                    .map_err(|e| UploadError::Store(e.to_string()))
            })
            .await
            .unwrap_or_else(|err| {
                debug!(call_id, error = %err, "Existence check failed, uploading anyway");
                false
            });

        if already_stored {
            let (signed_url, expires_at) = self.sign(key).await?;
            debug!(call_id, "Recording already stored, re-signed");
            return Ok(UploadOutcome::AlreadyStored {
                signed_url,
                expires_at,
            });
        }

        let data = self
            .within(UploadStage::Fetch, self.source.fetch(url, self.max_bytes))
            .await?;

        let stored = self
            .within(UploadStage::Store, async {
                self.store
                    .put(key, data, AUDIO_CONTENT_TYPE)
                    .await
                    .map_err(|e| UploadError::Store(e.to_string()))
            })
            .await?;

        let (signed_url, expires_at) = self.sign(key).await?;
        debug!(call_id, bytes = stored.size, "Recording uploaded");

        Ok(UploadOutcome::Uploaded {
            signed_url,
            expires_at,
            sha256: stored.checksum,
            bytes: stored.size,
        })
    }

    async fn sign(&self, key: &str) -> Result<(String, chrono::DateTime<Utc>), UploadError> {
        let signed_url = self
            .within(UploadStage::Sign, async {
                self.store
                    .sign(key, self.url_expiry)
                    .await
                    .map_err(|e| UploadError::Sign(e.to_string()))
            })
            .await?;
        let expires_at = Utc::now() + chrono::Duration::seconds(self.url_expiry.as_secs() as i64);
        Ok((signed_url, expires_at))
    }

    async fn within<T>(
        &self,
        stage: UploadStage,
        step: impl Future<Output = Result<T, UploadError>>,
    ) -> Result<T, UploadError> {
        match tokio::time::timeout(self.timeout, step).await {
            Ok(result) => result,
            Err(_) => Err(UploadError::Timeout {
                stage,
                secs: self.timeout.as_secs(),
            }),
        }
    }

    fn write_ledger(&self, rows: &[NormalizedRow], results: &[UploadResult]) {
        let Some(ledger) = &self.ledger else {
            return;
        };

        let recorded_at = Utc::now();
        let entries: Vec<LedgerEntry> = results
            .iter()
            .zip(rows)
            .filter_map(|(result, row)| match &result.outcome {
                UploadOutcome::Failed(err) => Some(LedgerEntry {
                    call_id: result.call_id.clone(),
                    stage: err.stage().as_str().to_string(),
                    error: err.to_string(),
                    source_url: row.stereo_recording_url.clone(),
                    recorded_at,
                }),
                _ => None,
            })
            .collect();

        if let Err(e) = ledger.append(&entries) {
            warn!(error = %e, failed = entries.len(), "Could not write failure ledger");
        }
    }
}
