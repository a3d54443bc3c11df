//! Fetch workers.
//!
//! Each worker is a long-lived task that takes one queued download at a time
//! from the shared job queue and streams it with a single GET into the blob
//! store, teeing every chunk through a [`StatusWriter`]. Failures become one
//! [`DownloadError`] on the error channel; there is no retry.

use std::cell::RefCell;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{Receiver, UnboundedSender};
use tokio::sync::Mutex;

use crate::blob_store::{BlobStore, BlobWriter};
use crate::clock::Clock;
use crate::config::HttpConfig;
use crate::model::{Download, DownloadError, StatusUpdate};
use crate::status_writer::{ChannelStatusSender, StatusWriter};

/// Non-200 answer to a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{method} {url} returned HTTP {status_code} {reason}")]
pub struct HttpError {
    pub method: String,
    pub url: String,
    pub status_code: u32,
    pub reason: String,
}

/// Why a fetch was abandoned.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(#[from] curl::Error),
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),
    #[error("blob store: {0:#}")]
    Storage(anyhow::Error),
    #[error("status channel: {0:#}")]
    Status(anyhow::Error),
}

/// Everything a worker needs besides the queue.
pub(crate) struct WorkerContext {
    pub blobs: Arc<dyn BlobStore>,
    pub http: HttpConfig,
    pub update_byte_threshold: u64,
    pub status_tx: UnboundedSender<StatusUpdate>,
    pub error_tx: UnboundedSender<DownloadError>,
    pub clock: Arc<dyn Clock>,
}

/// Worker loop: runs until the queue is closed.
pub(crate) async fn run_worker(
    index: usize,
    queue: Arc<Mutex<Receiver<Download>>>,
    ctx: Arc<WorkerContext>,
) {
    loop {
        // Holding the lock while waiting hands the next job to exactly one
        // idle worker.
        let next = { queue.lock().await.recv().await };
        let Some(download) = next else {
            break;
        };
        tracing::debug!(worker = index, download_id = %download.id, url = %download.url, "job taken");
        process(index, download, &ctx).await;
    }
    tracing::debug!(worker = index, "job queue closed");
}

async fn process(index: usize, download: Download, ctx: &WorkerContext) {
    let id = download.id.clone();
    let status = StatusWriter::new(
        download.id.clone(),
        download.checksum_type,
        ctx.update_byte_threshold,
        Arc::new(ChannelStatusSender::new(ctx.status_tx.clone())),
        ctx.clock.clone(),
    );
    let blobs = ctx.blobs.clone();
    let http = ctx.http.clone();

    let outcome = tokio::task::spawn_blocking(move || fetch(&download, blobs.as_ref(), &http, status)).await;
    let message = match outcome {
        Ok(Ok(bytes)) => {
            tracing::info!(worker = index, download_id = %id, bytes, "fetch complete");
            return;
        }
        Ok(Err(e)) => e.to_string(),
        Err(e) => format!("fetch task failed: {}", e),
    };
    tracing::warn!(worker = index, download_id = %id, error = %message, "fetch failed");
    let err = DownloadError::new(id, message, ctx.clock.now());
    if ctx.error_tx.send(err).is_err() {
        tracing::warn!(worker = index, "error channel closed");
    }
}

/// Stream `download` into the blob store. Blocking; returns bytes written.
///
/// On success the blob is committed before the status writer is closed, so
/// the final update only ever describes a stored payload. On failure the
/// writer is dropped uncommitted and no final update is sent.
pub fn fetch(
    download: &Download,
    blobs: &dyn BlobStore,
    http: &HttpConfig,
    mut status: StatusWriter,
) -> Result<u64, FetchError> {
    status.send_start_update().map_err(FetchError::Status)?;
    let mut blob: Box<dyn BlobWriter> = blobs.writer(download).map_err(FetchError::Storage)?;

    let url = download.url.as_str();
    let mut easy = curl::easy::Easy::new();
    easy.url(url)?;
    easy.follow_location(true)?;
    easy.max_redirections(10)?;
    easy.connect_timeout(Duration::from_secs(http.connect_timeout_secs))?;
    easy.low_speed_limit(http.low_speed_limit_bytes)?;
    easy.low_speed_time(Duration::from_secs(http.low_speed_time_secs))?;

    // Status line of the latest response; redirects replace it.
    let status_line: RefCell<(u32, String)> = RefCell::new((0, String::new()));
    let write_error: RefCell<Option<std::io::Error>> = RefCell::new(None);
    let mut written: u64 = 0;

    let performed = {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            if let Some(parsed) = std::str::from_utf8(data).ok().and_then(parse_status_line) {
                *status_line.borrow_mut() = parsed;
            }
            true
        })?;
        transfer.write_function(|data| {
            // Bodies of error responses are not stored.
            if status_line.borrow().0 != 200 {
                return Ok(data.len());
            }
            let result = blob
                .write_all(data)
                .and_then(|()| status.write_all(data));
            match result {
                Ok(()) => {
                    written += data.len() as u64;
                    Ok(data.len())
                }
                Err(e) => {
                    *write_error.borrow_mut() = Some(e);
                    Ok(0) // abort transfer
                }
            }
        })?;
        transfer.perform()
    };

    if let Some(e) = write_error.into_inner() {
        return Err(FetchError::Write(e));
    }
    performed?;

    let code = easy.response_code()?;
    if code != 200 {
        let (_, reason) = status_line.into_inner();
        return Err(HttpError {
            method: "GET".to_string(),
            url: url.to_string(),
            status_code: code,
            reason,
        }
        .into());
    }

    blob.commit().map_err(FetchError::Storage)?;
    status.close().map_err(FetchError::Status)?;
    Ok(written)
}

/// `HTTP/1.1 404 Not Found` -> `(404, "Not Found")`.
fn parse_status_line(line: &str) -> Option<(u32, String)> {
    let line = line.trim_end();
    if !line.starts_with("HTTP/") {
        return None;
    }
    let mut parts = line.splitn(3, ' ');
    parts.next()?;
    let code = parts.next()?.parse().ok()?;
    let reason = parts.next().unwrap_or("").trim().to_string();
    Some((code, reason))
}
