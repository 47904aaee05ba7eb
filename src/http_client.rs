//! HTTP client capability boundary
//!
//! The spec treats the raw HTTP client as an external collaborator with a
//! `GET(url, out_path) -> bytes_written | error` contract. `HttpClient` is
//! that contract as a trait, so the Download Engine never depends on
//! `reqwest` directly. `ReqwestHttpClient` is the default, real
//! implementation (grounded in the teacher's `reqwest::Client` usage in
//! `pricing/brapi.rs`); `MockHttpClient` is an in-memory stand-in for
//! tests, in the spirit of the teacher's `progress_callback: Option<&dyn
//! Fn(..)>` dependency-injection style.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

/// Outcome of a single streamed download.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub bytes_written: u64,
    pub content_length: Option<u64>,
    pub etag_md5: Option<String>,
}

/// Errors surfaced by an `HttpClient` implementation, already classified
/// the way the Retry Strategy expects (kind, not just message).
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("timeout error: {0}")]
    Timeout(String),
    #[error("http status {0}")]
    Status(u16),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Timeouts and 5xx statuses are retryable outright; a bare I/O error
    /// is not (it is reclassified as fatal before this ever runs, see
    /// `classify_io_fatal`). A `Network` error defers to the Retry
    /// Strategy's message-substring classifier (§4.2), since "network
    /// error" covers both transient connection resets and terminal
    /// conditions like a malformed URL.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network(message) => crate::retry::is_retryable(message),
            FetchError::Timeout(_) => true,
            FetchError::Status(code) => *code >= 500,
            FetchError::Io(_) => false,
        }
    }
}

/// A capability for fetching a URL into a local file in streaming fashion.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        out_path: &Path,
        chunk_read_timeout: Duration,
    ) -> Result<FetchOutcome, FetchError>;
}

/// Default `reqwest`-backed implementation: streams the response body in
/// 64 KiB chunks (§4.3 step 3), enforcing a per-chunk read timeout.
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new(total_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(total_timeout)
            .build()
            .expect("reqwest client configuration is always valid");
        Self { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn fetch(
        &self,
        url: &str,
        out_path: &Path,
        chunk_read_timeout: Duration,
    ) -> Result<FetchOutcome, FetchError> {
        use futures_util::StreamExt;

        let response = self.client.get(url).send().await.map_err(classify_reqwest_err)?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let content_length = response.content_length();
        let etag_md5 = response
            .headers()
            .get("content-md5")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let mut file = tokio::fs::File::create(out_path).await?;
        let mut stream = response.bytes_stream();
        let mut bytes_written: u64 = 0;

        while let Some(chunk) = tokio::time::timeout(chunk_read_timeout, stream.next())
            .await
            .map_err(|_| FetchError::Timeout(format!("no data within {chunk_read_timeout:?}")))?
        {
            let chunk = chunk.map_err(classify_reqwest_err)?;
            file.write_all(&chunk).await?;
            bytes_written += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;

        Ok(FetchOutcome {
            bytes_written,
            content_length,
            etag_md5,
        })
    }
}

fn classify_reqwest_err(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(err.to_string())
    } else {
        FetchError::Network(err.to_string())
    }
}

/// Scripted, fully in-memory client for tests: each URL maps to either a
/// byte payload to "download" or a canned error sequence (so retry logic
/// can be exercised deterministically).
#[derive(Default)]
pub struct MockHttpClient {
    responses: std::sync::Mutex<HashMap<String, std::collections::VecDeque<MockResponse>>>,
}

pub enum MockResponse {
    Body(Vec<u8>),
    Error(FetchError),
}

impl Clone for MockResponse {
    fn clone(&self) -> Self {
        match self {
            MockResponse::Body(b) => MockResponse::Body(b.clone()),
            MockResponse::Error(e) => MockResponse::Error(match e {
                FetchError::Network(m) => FetchError::Network(m.clone()),
                FetchError::Timeout(m) => FetchError::Timeout(m.clone()),
                FetchError::Status(c) => FetchError::Status(*c),
                FetchError::Io(_) => FetchError::Network("io".to_string()),
            }),
        }
    }
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response; successive calls to the same URL consume the
    /// queue in order, the last entry repeating once exhausted (so a test
    /// can queue five identical failures without five `queue()` calls).
    pub fn queue(self, url: impl Into<String>, response: MockResponse) -> Self {
        self.responses
            .lock()
            .unwrap()
            .entry(url.into())
            .or_default()
            .push_back(response);
        self
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn fetch(
        &self,
        url: &str,
        out_path: &Path,
        _chunk_read_timeout: Duration,
    ) -> Result<FetchOutcome, FetchError> {
        let response = {
            let mut guard = self.responses.lock().unwrap();
            let queue = guard.get_mut(url).ok_or(FetchError::Status(404))?;
            if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                queue.front().cloned().ok_or(FetchError::Status(404))?
            }
        };

        match response {
            MockResponse::Body(bytes) => {
                tokio::fs::write(out_path, &bytes).await?;
                Ok(FetchOutcome {
                    bytes_written: bytes.len() as u64,
                    content_length: Some(bytes.len() as u64),
                    etag_md5: None,
                })
            }
            MockResponse::Error(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_client_serves_queued_body() {
        let client = MockHttpClient::new().queue(
            "http://x/a.zip",
            MockResponse::Body(b"hello".to_vec()),
        );
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("a.zip");
        let outcome = client
            .fetch("http://x/a.zip", &out, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(outcome.bytes_written, 5);
        assert_eq!(std::fs::read(&out).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn mock_client_serves_queued_error() {
        let client = MockHttpClient::new().queue(
            "http://x/a.zip",
            MockResponse::Error(FetchError::Status(503)),
        );
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("a.zip");
        let err = client
            .fetch("http://x/a.zip", &out, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status(503)));
        assert!(err.is_retryable());
    }
}
