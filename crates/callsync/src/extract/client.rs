//! HTTP client for the call platform's paginated list endpoint

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, instrument};

use super::{CallPage, CallSource, PageQuery};
use crate::config::ApiConfig;
use crate::error::ExtractionError;
use crate::models::CallRecord;
use callsync_common::time::to_api_string;

/// Longest error body kept in an `ExtractionError::Status`
const MAX_ERROR_BODY: usize = 512;

pub struct VapiClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl VapiClient {
    pub fn new(config: &ApiConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("callsync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn query_params(query: &PageQuery) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("page", query.page.to_string()),
            ("limit", query.limit.to_string()),
            ("sortOrder", "ASC".to_string()),
        ];
        if let Some(start) = query.window.start {
            params.push(("updatedAtGe", to_api_string(&start)));
        }
        if let Some(end) = query.window.end {
            params.push(("updatedAtLt", to_api_string(&end)));
        }
        params
    }
}

#[async_trait]
impl CallSource for VapiClient {
    #[instrument(skip(self), fields(page = query.page))]
    async fn fetch_page(&self, query: &PageQuery) -> Result<CallPage, ExtractionError> {
        let page = query.page;
        let response = self
            .client
            .get(&self.base_url)
            .bearer_auth(&self.api_key)
            .query(&Self::query_params(query))
            .send()
            .await
            .map_err(|e| ExtractionError::from_reqwest(page, e))?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|i| body.is_char_boundary(*i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            return Err(ExtractionError::Status {
                page,
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ExtractionError::from_reqwest(page, e))?;

        let parsed = match payload {
            // Older list endpoints return a bare array
            Value::Array(items) => CallPage {
                results: items.into_iter().map(CallRecord::from_value).collect(),
                ..Default::default()
            },
            other => serde_json::from_value(other).map_err(|e| ExtractionError::Decode {
                page,
                message: e.to_string(),
            })?,
        };

        debug!(fetched = parsed.results.len(), "Decoded page");
        Ok(parsed)
    }
}
