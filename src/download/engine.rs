//! Parallel Download Engine (§4.3)
//!
//! A bounded worker pool pulls `(doc_type, year, url)` triples from a
//! shared queue, each worker fetching through the `HttpClient` capability,
//! verifying integrity, and placing the result via temp-then-rename. A
//! per-file failure never aborts the batch; disk-full and
//! permission-denied do (§4.3's failure semantics), signalled to sibling
//! workers via a shared abort flag rather than task cancellation.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use md5::{Digest, Md5};
use tokio::sync::Mutex as AsyncMutex;

use crate::config::NetworkConfig;
use crate::download::plan::{DownloadOutcome, DownloadPlan};
use crate::error::{DataFinanceError, Result};
use crate::http_client::{FetchError, HttpClient};
use crate::resource_monitor::{ResourceMonitor, ResourceState};

const DEFAULT_CONFIGURED_MAX_WORKERS: usize = 8;
const CHUNK_READ_TIMEOUT: Duration = Duration::from_secs(60);

struct WorkItem {
    doc_type: String,
    year: i32,
    url: String,
    local_filename: String,
}

pub struct DownloadEngine {
    http_client: Arc<dyn HttpClient>,
    network: NetworkConfig,
    monitor: Arc<ResourceMonitor>,
}

impl DownloadEngine {
    pub fn new(http_client: Arc<dyn HttpClient>, network: NetworkConfig, monitor: Arc<ResourceMonitor>) -> Self {
        Self { http_client, network, monitor }
    }

    pub async fn download(&self, plan: &DownloadPlan, destination_dir: &Path) -> Result<DownloadOutcome> {
        tokio::fs::create_dir_all(destination_dir).await?;

        let mut queue = VecDeque::new();
        for (doc_type, items) in plan.entries() {
            tokio::fs::create_dir_all(destination_dir.join(doc_type)).await?;
            for entry in items {
                queue.push_back(WorkItem {
                    doc_type: doc_type.to_string(),
                    year: entry.year,
                    url: entry.url.clone(),
                    local_filename: entry.local_filename.clone(),
                });
            }
        }

        let queue = Arc::new(AsyncMutex::new(queue));
        let outcome = Arc::new(AsyncMutex::new(DownloadOutcome::default()));
        let fatal: Arc<AsyncMutex<Option<DataFinanceError>>> = Arc::new(AsyncMutex::new(None));
        let aborted = Arc::new(AtomicBool::new(false));

        let n_workers = self.monitor.safe_worker_count(DEFAULT_CONFIGURED_MAX_WORKERS);
        let mut handles = Vec::with_capacity(n_workers);

        for _ in 0..n_workers {
            let queue = Arc::clone(&queue);
            let outcome = Arc::clone(&outcome);
            let fatal = Arc::clone(&fatal);
            let aborted = Arc::clone(&aborted);
            let http_client = Arc::clone(&self.http_client);
            let network = self.network.clone();
            let destination_dir = destination_dir.to_path_buf();
            let monitor = Arc::clone(&self.monitor);

            handles.push(tokio::spawn(async move {
                loop {
                    if aborted.load(Ordering::Relaxed) {
                        return;
                    }
                    let item = {
                        let mut q = queue.lock().await;
                        q.pop_front()
                    };
                    let Some(item) = item else { return };

                    if monitor.circuit_breaker_active() {
                        let monitor_owned = Arc::clone(&monitor);
                        tokio::task::spawn_blocking(move || {
                            monitor_owned.wait_for(ResourceState::Critical, Duration::from_secs(30))
                        })
                        .await
                        .ok();
                    }

                    match process_one(&item, &destination_dir, &http_client, &network).await {
                        Ok(()) => {
                            outcome.lock().await.record_success(&item.doc_type, item.year);
                        }
                        Err(ProcessError::Retryable(msg)) => {
                            outcome
                                .lock()
                                .await
                                .record_failure(format!("{}/{}", item.doc_type, item.year), msg);
                        }
                        Err(ProcessError::Fatal(err)) => {
                            aborted.store(true, Ordering::Relaxed);
                            *fatal.lock().await = Some(err);
                            return;
                        }
                    }
                }
            }));
        }

        for handle in handles {
            handle
                .await
                .map_err(|e| DataFinanceError::Extraction(format!("download worker panicked: {e}")))?;
        }

        if let Some(err) = fatal.lock().await.take() {
            return Err(err);
        }

        Ok(Arc::try_unwrap(outcome).unwrap().into_inner())
    }
}

enum ProcessError {
    Retryable(String),
    Fatal(DataFinanceError),
}

async fn process_one(
    item: &WorkItem,
    destination_dir: &Path,
    http_client: &Arc<dyn HttpClient>,
    network: &NetworkConfig,
) -> std::result::Result<(), ProcessError> {
    let target = destination_dir.join(&item.doc_type).join(&item.local_filename);

    if let Ok(meta) = tokio::fs::metadata(&target).await {
        if meta.len() > 0 {
            return Ok(());
        }
    }

    let tmp = tmp_path(&target);
    let mut last_error = String::new();

    for attempt in 0..=network.max_retries {
        let fetch_result = tokio::time::timeout(
            network.total_timeout,
            http_client.fetch(&item.url, &tmp, CHUNK_READ_TIMEOUT),
        )
        .await;

        let fetch_result = match fetch_result {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(format!(
                "no completed download within {:?}",
                network.total_timeout
            ))),
        };

        match fetch_result {
            Ok(outcome) => match verify_integrity(&tmp, &outcome).await {
                Ok(()) => {
                    tokio::fs::rename(&tmp, &target)
                        .await
                        .map_err(|e| ProcessError::Fatal(DataFinanceError::Io(e)))?;
                    return Ok(());
                }
                Err(reason) => {
                    let _ = tokio::fs::remove_file(&tmp).await;
                    last_error = reason;
                }
            },
            Err(FetchError::Io(io_err)) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(classify_io_fatal(io_err));
            }
            Err(fetch_err) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                last_error = fetch_err.to_string();
                if !fetch_err.is_retryable() {
                    return Err(ProcessError::Retryable(last_error));
                }
            }
        }

        if attempt < network.max_retries {
            let delay = crate::retry::BackoffPolicy::from_config(network.retry_backoff_multiplier)
                .backoff(attempt);
            tokio::time::sleep(delay).await;
        }
    }

    Err(ProcessError::Retryable(last_error))
}

async fn verify_integrity(tmp: &Path, outcome: &crate::http_client::FetchOutcome) -> std::result::Result<(), String> {
    if let Some(expected_len) = outcome.content_length {
        if outcome.bytes_written != expected_len {
            return Err(format!(
                "size mismatch: wrote {} bytes, Content-Length advertised {expected_len}",
                outcome.bytes_written
            ));
        }
    }

    if let Some(expected_md5) = &outcome.etag_md5 {
        let bytes = tokio::fs::read(tmp).await.map_err(|e| e.to_string())?;
        let mut hasher = Md5::new();
        hasher.update(&bytes);
        let actual = format!("{:x}", hasher.finalize());
        if !actual.eq_ignore_ascii_case(expected_md5) {
            return Err(format!("MD5 mismatch: expected {expected_md5}, got {actual}"));
        }
    }

    Ok(())
}

fn classify_io_fatal(io_err: std::io::Error) -> ProcessError {
    use std::io::ErrorKind;
    match io_err.kind() {
        ErrorKind::PermissionDenied => ProcessError::Fatal(DataFinanceError::Permission(io_err.to_string())),
        _ if io_err.raw_os_error() == Some(28) /* ENOSPC */ => {
            ProcessError::Fatal(DataFinanceError::DiskFull(io_err.to_string()))
        }
        _ => ProcessError::Retryable(io_err.to_string()),
    }
}

fn tmp_path(target: &Path) -> PathBuf {
    let mut tmp = target.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceLimits;
    use crate::download::plan::{CvmUrlCatalog, DownloadPlan};
    use crate::http_client::MockHttpClient;
    use tempfile::tempdir;

    #[tokio::test]
    async fn happy_path_downloads_and_places_files() {
        let dest = tempdir().unwrap();
        let catalog = CvmUrlCatalog::default();
        let plan = DownloadPlan::build(&["DFP"], 2023, 2023, 2026, &catalog).unwrap();

        let (_, entries) = plan.entries().next().unwrap();
        let url = entries[0].url.clone();

        let client = Arc::new(
            MockHttpClient::new().queue(
                &url,
                crate::http_client::MockResponse::Body(b"zip-bytes".to_vec()),
            ),
        ) as Arc<dyn HttpClient>;

        let monitor = ResourceMonitor::with_limits(ResourceLimits::default());
        let engine = DownloadEngine::new(client, NetworkConfig::default(), Arc::new(monitor));
        let outcome = engine.download(&plan, dest.path()).await.unwrap();

        assert_eq!(outcome.success_count(), 1);
        assert_eq!(outcome.error_count(), 0);
        let target = dest.path().join("DFP").join(&entries[0].local_filename);
        assert!(target.exists());
        assert!(!tmp_path(&target).exists());
    }

    #[tokio::test]
    async fn existing_non_empty_file_is_skipped() {
        let dest = tempdir().unwrap();
        let catalog = CvmUrlCatalog::default();
        let plan = DownloadPlan::build(&["DFP"], 2023, 2023, 2026, &catalog).unwrap();
        let (_, entries) = plan.entries().next().unwrap();

        let doc_dir = dest.path().join("DFP");
        std::fs::create_dir_all(&doc_dir).unwrap();
        std::fs::write(doc_dir.join(&entries[0].local_filename), b"already-here").unwrap();

        // No response queued: if the engine tried to fetch, this would fail
        // with a 404, proving the skip path was taken.
        let client = Arc::new(MockHttpClient::new()) as Arc<dyn HttpClient>;
        let monitor = ResourceMonitor::with_limits(ResourceLimits::default());
        let engine = DownloadEngine::new(client, NetworkConfig::default(), Arc::new(monitor));
        let outcome = engine.download(&plan, dest.path()).await.unwrap();

        assert_eq!(outcome.success_count(), 1);
        assert_eq!(outcome.error_count(), 0);
    }

    #[tokio::test]
    async fn exhausted_retries_record_a_failure_not_an_abort() {
        let dest = tempdir().unwrap();
        let catalog = CvmUrlCatalog::default();
        let plan = DownloadPlan::build(&["DFP"], 2023, 2023, 2026, &catalog).unwrap();
        let (_, entries) = plan.entries().next().unwrap();
        let url = entries[0].url.clone();

        let client = Arc::new(
            MockHttpClient::new().queue(&url, crate::http_client::MockResponse::Error(FetchError::Status(503))),
        ) as Arc<dyn HttpClient>;

        let mut network = NetworkConfig::default();
        network.max_retries = 1;
        network.total_timeout = Duration::from_secs(5);

        let monitor = ResourceMonitor::with_limits(ResourceLimits::default());
        let engine = DownloadEngine::new(client, network, Arc::new(monitor));
        let outcome = engine.download(&plan, dest.path()).await.unwrap();

        assert_eq!(outcome.success_count(), 0);
        assert_eq!(outcome.error_count(), 1);
    }
}
