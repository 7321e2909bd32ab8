//! Recording downloads

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::error::UploadError;

/// Where source recordings are read from
#[async_trait]
pub trait AudioSource: Send + Sync {
    /// Download the asset at `url`, refusing anything above `max_bytes`
    async fn fetch(&self, url: &str, max_bytes: u64) -> Result<Vec<u8>, UploadError>;
}

pub struct HttpAudioSource {
    client: Client,
}

impl HttpAudioSource {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("callsync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AudioSource for HttpAudioSource {
    #[instrument(skip(self))]
    async fn fetch(&self, url: &str, max_bytes: u64) -> Result<Vec<u8>, UploadError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| UploadError::Fetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::SourceStatus(status.as_u16()));
        }

        if let Some(declared) = response.content_length() {
            if declared > max_bytes {
                return Err(UploadError::TooLarge {
                    bytes: declared,
                    limit: max_bytes,
                });
            }
        }

        let mut data = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| UploadError::Fetch(e.to_string()))?
        {
            if (data.len() + chunk.len()) as u64 > max_bytes {
                return Err(UploadError::TooLarge {
                    bytes: (data.len() + chunk.len()) as u64,
                    limit: max_bytes,
                });
            }
            data.extend_from_slice(&chunk);
        }

        if data.is_empty() {
            return Err(UploadError::Empty);
        }

        debug!(bytes = data.len(), "Downloaded recording");
        Ok(data)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn serve(status: u16, body: Vec<u8>) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rec.mp3"))
            .respond_with(ResponseTemplate::new(status).set_body_bytes(body))
            .mount(&server)
            .await;
        server
    }

    fn source() -> HttpAudioSource {
        HttpAudioSource::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_returns_body() {
        let server = serve(200, b"ID3audio".to_vec()).await;
        let data = source()
            .fetch(&format!("{}/rec.mp3", server.uri()), 1024)
            .await
            .unwrap();
        assert_eq!(data, b"ID3audio");
    }

    #[tokio::test]
    async fn test_fetch_rejects_oversized_asset() {
        let server = serve(200, vec![7u8; 2048]).await;
        let err = source()
            .fetch(&format!("{}/rec.mp3", server.uri()), 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::TooLarge { limit: 1024, .. }));
    }

    #[tokio::test]
    async fn test_fetch_rejects_empty_body() {
        let server = serve(200, Vec::new()).await;
        let err = source()
            .fetch(&format!("{}/rec.mp3", server.uri()), 1024)
            .await
            .unwrap_err();
        assert_eq!(err, UploadError::Empty);
    }

    #[tokio::test]
    async fn test_fetch_maps_http_status() {
        let server = serve(404, b"gone".to_vec()).await;
        let err = source()
            .fetch(&format!("{}/rec.mp3", server.uri()), 1024)
            .await
            .unwrap_err();
        assert_eq!(err, UploadError::SourceStatus(404));
    }
}
