//! Extraction stage
//!
//! Walks the call platform's list endpoint page by page for one update
//! window and accumulates every call object in memory. Any page failure
//! aborts the whole extraction; pages are never skipped.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::config::ApiConfig;
use crate::error::ExtractionError;
use crate::models::{CallRecord, RunWindow};

pub mod client;

pub use client::VapiClient;

/// Request for one page of calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageQuery {
    /// 1-based page number
    pub page: u32,
    pub limit: u32,
    pub window: RunWindow,
}

/// Pagination envelope metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetadata {
    #[serde(default)]
    pub total_items: Option<u64>,
    #[serde(default)]
    pub items_per_page: Option<u32>,
    #[serde(default)]
    pub current_page: Option<u32>,
    #[serde(default)]
    pub total_pages: Option<u32>,
}

/// One page of calls
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallPage {
    #[serde(default)]
    pub results: Vec<CallRecord>,
    #[serde(default)]
    pub metadata: PageMetadata,
}

/// Paginated source of raw call records
#[async_trait]
pub trait CallSource: Send + Sync {
    async fn fetch_page(&self, query: &PageQuery) -> Result<CallPage, ExtractionError>;
}

/// Everything one extraction produced
#[derive(Debug, Clone, Default)]
pub struct ExtractOutcome {
    pub records: Vec<CallRecord>,
    pub pages_fetched: u32,
    /// `totalItems` as reported on the first page, if any
    pub total_reported: Option<u64>,
}

pub struct Extractor {
    source: Arc<dyn CallSource>,
    page_limit: u32,
    max_total_items: u64,
    page_delay: Duration,
}

impl Extractor {
    pub fn new(source: Arc<dyn CallSource>, config: &ApiConfig) -> Self {
        Self {
            source,
            page_limit: config.page_limit.max(1),
            max_total_items: config.max_total_items,
            page_delay: config.page_delay(),
        }
    }

    pub fn with_page_limit(mut self, page_limit: u32) -> Self {
        self.page_limit = page_limit.max(1);
        self
    }

    pub fn with_max_total_items(mut self, max_total_items: u64) -> Self {
        self.max_total_items = max_total_items;
        self
    }

    pub fn with_page_delay(mut self, page_delay: Duration) -> Self {
        self.page_delay = page_delay;
        self
    }

    /// Fetch every call updated inside `window`
    #[instrument(skip(self), fields(window = %window))]
    pub async fn extract(&self, window: RunWindow) -> Result<ExtractOutcome, ExtractionError> {
        info!(page_limit = self.page_limit, "Starting extraction");

        let mut outcome = ExtractOutcome::default();
        let mut page = 1u32;

        loop {
            let query = PageQuery {
                page,
                limit: self.page_limit,
                window,
            };
            let CallPage { results, metadata } = self.source.fetch_page(&query).await?;
            outcome.pages_fetched += 1;

            if page == 1 {
                if let Some(total) = metadata.total_items {
                    if total > self.max_total_items {
                        return Err(ExtractionError::WindowTooLarge {
                            total,
                            limit: self.max_total_items,
                        });
                    }
                }
                outcome.total_reported = metadata.total_items;
            }

            let fetched = results.len();
            if fetched == 0 {
                debug!(page, "Empty page, extraction complete");
                break;
            }

            outcome.records.extend(results);
            info!(page, fetched, total = outcome.records.len(), "Fetched page");

            // Backstop for a source that keeps returning full pages
            if outcome.records.len() as u64 > self.max_total_items {
                return Err(ExtractionError::WindowTooLarge {
                    total: outcome.records.len() as u64,
                    limit: self.max_total_items,
                });
            }

            if fetched < self.page_limit as usize {
                debug!(page, "Short page, extraction complete");
                break;
            }
            if let (Some(current), Some(total_pages)) = (metadata.current_page, metadata.total_pages) {
                if current >= total_pages {
                    debug!(page, total_pages, "Last reported page, extraction complete");
                    break;
                }
            }

            page += 1;
            if !self.page_delay.is_zero() {
                tokio::time::sleep(self.page_delay).await;
            }
        }

        info!(
            records = outcome.records.len(),
            pages = outcome.pages_fetched,
            "Extraction complete"
        );

        Ok(outcome)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Serves a fixed list of pages and records the queries it saw
    struct ScriptedSource {
        pages: Vec<Result<CallPage, ExtractionError>>,
        seen: Mutex<Vec<PageQuery>>,
    }

    impl ScriptedSource {
        fn new(pages: Vec<Result<CallPage, ExtractionError>>) -> Self {
            Self {
                pages,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CallSource for ScriptedSource {
        async fn fetch_page(&self, query: &PageQuery) -> Result<CallPage, ExtractionError> {
            self.seen.lock().unwrap().push(*query);
            match self.pages.get(query.page as usize - 1) {
                Some(Ok(page)) => Ok(page.clone()),
                Some(Err(ExtractionError::Timeout { .. })) => {
                    Err(ExtractionError::Timeout { page: query.page })
                }
                Some(Err(_)) => Err(ExtractionError::Request {
                    page: query.page,
                    message: "boom".into(),
                }),
                None => Ok(CallPage::default()),
            }
        }
    }

    fn page_of(ids: &[&str], total: Option<u64>) -> CallPage {
        CallPage {
            results: ids
                .iter()
                .map(|id| CallRecord::from_value(json!({"id": id})))
                .collect(),
            metadata: PageMetadata {
                total_items: total,
                ..Default::default()
            },
        }
    }

    fn extractor(source: Arc<ScriptedSource>, limit: u32) -> Extractor {
        Extractor {
            source,
            page_limit: limit,
            max_total_items: 100,
            page_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_stops_on_short_page() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(page_of(&["a", "b"], Some(3))),
            Ok(page_of(&["c"], None)),
            Ok(page_of(&["never"], None)),
        ]));

        let outcome = extractor(source.clone(), 2)
            .extract(RunWindow::default())
            .await
            .unwrap();

        assert_eq!(outcome.records.len(), 3);
        assert_eq!(outcome.pages_fetched, 2);
        assert_eq!(outcome.total_reported, Some(3));
        let pages: Vec<u32> = source.seen.lock().unwrap().iter().map(|q| q.page).collect();
        assert_eq!(pages, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_stops_on_empty_page() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(page_of(&["a", "b"], None)),
            Ok(page_of(&[], None)),
        ]));

        let outcome = extractor(source, 2).extract(RunWindow::default()).await.unwrap();
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.pages_fetched, 2);
    }

    #[tokio::test]
    async fn test_stops_on_reported_last_page() {
        let mut first = page_of(&["a", "b"], Some(2));
        first.metadata.current_page = Some(1);
        first.metadata.total_pages = Some(1);
        let source = Arc::new(ScriptedSource::new(vec![Ok(first)]));

        let outcome = extractor(source.clone(), 2)
            .extract(RunWindow::default())
            .await
            .unwrap();
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(source.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_page_failure_after_partial_progress_is_fatal() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(page_of(&["a", "b"], None)),
            Err(ExtractionError::Timeout { page: 0 }),
        ]));

        let err = extractor(source, 2)
            .extract(RunWindow::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Timeout { page: 2 }));
    }

    #[tokio::test]
    async fn test_runaway_window_is_rejected_up_front() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(page_of(&["a"], Some(101)))]));

        let err = extractor(source, 2)
            .extract(RunWindow::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExtractionError::WindowTooLarge {
                total: 101,
                limit: 100
            }
        ));
    }

    #[tokio::test]
    async fn test_window_is_forwarded() {
        use chrono::TimeZone;
        let start = chrono::Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap();
        let window = RunWindow::new(Some(start), None);
        let source = Arc::new(ScriptedSource::new(vec![Ok(page_of(&[], None))]));

        extractor(source.clone(), 10).extract(window).await.unwrap();
        assert_eq!(source.seen.lock().unwrap()[0].window, window);
    }
}
