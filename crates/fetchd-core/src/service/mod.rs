//! Download orchestration.
//!
//! The [`DownloadService`] owns the bounded job queue, the worker pool and the
//! reconciliation loop. Requests are deduplicated by [`ResourceKey`]: the
//! first request for a key creates and queues a [`Download`], later ones
//! attach to it.
//!
//! Workers never touch the record store. They report through two unbounded
//! channels (status updates and errors) that a single reconciliation task
//! applies to the stored downloads, so every record has exactly one writer
//! once it is queued.

mod events;
mod reconcile;

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, Receiver, Sender, UnboundedReceiver, UnboundedSender};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::blob_store::BlobStore;
use crate::checksum::{digest_reader, ChecksumKind};
use crate::clock::{Clock, IdGenerator};
use crate::config::{FetchdConfig, HttpConfig};
use crate::hooks::HookService;
use crate::model::{Download, DownloadError, Request, ResourceKey, StatusUpdate};
use crate::stats::DownloadStats;
use crate::store::{DownloadFilter, DownloadStore, Page};
use crate::worker::{run_worker, WorkerContext};

pub use events::DownloadEvent;

const EVENT_CAPACITY: usize = 256;

/// Service tuning taken from the config.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub worker_count: usize,
    pub queue_length: usize,
    pub update_byte_threshold: u64,
    pub http: HttpConfig,
}

impl From<&FetchdConfig> for ServiceSettings {
    fn from(cfg: &FetchdConfig) -> Self {
        Self {
            worker_count: cfg.worker_count.max(1),
            queue_length: cfg.queue_length.max(1),
            update_byte_threshold: cfg.update_byte_threshold,
            http: cfg.http.clone(),
        }
    }
}

/// Result of re-hashing a stored payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumReport {
    pub kind: ChecksumKind,
    pub recorded: String,
    pub computed: String,
}

impl ChecksumReport {
    pub fn matches(&self) -> bool {
        self.recorded.eq_ignore_ascii_case(&self.computed)
    }
}

/// Receiving ends, held until `start` hands them to the tasks.
struct PendingChannels {
    queue_rx: Receiver<Download>,
    status_rx: UnboundedReceiver<StatusUpdate>,
    error_rx: UnboundedReceiver<DownloadError>,
}

pub struct DownloadService {
    settings: ServiceSettings,
    store: Arc<dyn DownloadStore>,
    blobs: Arc<dyn BlobStore>,
    hooks: Option<Arc<HookService>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    queue_tx: Sender<Download>,
    status_tx: UnboundedSender<StatusUpdate>,
    error_tx: UnboundedSender<DownloadError>,
    pending: Mutex<Option<PendingChannels>>,
    /// Serializes find-or-create against the finish transition.
    create_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<DownloadEvent>,
    unattributed: Mutex<Vec<DownloadError>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DownloadService {
    pub fn new(
        settings: ServiceSettings,
        store: Arc<dyn DownloadStore>,
        blobs: Arc<dyn BlobStore>,
        hooks: Option<Arc<HookService>>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::channel(settings.queue_length.max(1));
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            settings,
            store,
            blobs,
            hooks,
            clock,
            ids,
            queue_tx,
            status_tx,
            error_tx,
            pending: Mutex::new(Some(PendingChannels {
                queue_rx,
                status_rx,
                error_rx,
            })),
            create_lock: tokio::sync::Mutex::new(()),
            events,
            unattributed: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the workers and the reconciliation loop. Must run inside a tokio
    /// runtime; fails if called twice.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let channels = lock(&self.pending)
            .take()
            .context("download service already started")?;

        let queue = Arc::new(tokio::sync::Mutex::new(channels.queue_rx));
        let ctx = Arc::new(WorkerContext {
            blobs: self.blobs.clone(),
            http: self.settings.http.clone(),
            update_byte_threshold: self.settings.update_byte_threshold,
            status_tx: self.status_tx.clone(),
            error_tx: self.error_tx.clone(),
            clock: self.clock.clone(),
        });

        let mut tasks = lock(&self.tasks);
        for index in 0..self.settings.worker_count {
            tasks.push(tokio::spawn(run_worker(index, queue.clone(), ctx.clone())));
        }
        tasks.push(tokio::spawn(reconcile::run(
            self.clone(),
            channels.status_rx,
            channels.error_rx,
        )));
        tracing::info!(
            workers = self.settings.worker_count,
            queue_length = self.settings.queue_length,
            "download service started"
        );
        Ok(())
    }

    /// Stop the workers and the reconciliation loop. A fetch already running
    /// on the blocking pool finishes in the background; its reports are lost.
    pub fn shutdown(&self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        tracing::info!("download service stopped");
    }

    /// Find or create the download for `request` and queue it if new.
    ///
    /// A duplicate request attaches its callback to the existing download and
    /// is notified at once if that download already finished. A download whose
    /// previous transfer failed is reset and queued again. Blocks while the
    /// job queue is full.
    pub async fn process_request(&self, request: &Request) -> Result<Download> {
        let key = request.resource_key();
        let (download, enqueue) = {
            let _guard = self.create_lock.lock().await;
            match self.store.find_by_resource_key(&key).await? {
                Some(mut existing) if existing.failed => {
                    existing.reset_for_retry();
                    self.store.update(&existing).await?;
                    self.register_callback(&existing, request).await?;
                    tracing::info!(download_id = %existing.id, %key, "retrying failed download");
                    (existing, true)
                }
                Some(existing) => {
                    tracing::debug!(download_id = %existing.id, %key, "duplicate request");
                    self.register_callback(&existing, request).await?;
                    if existing.finished {
                        if let Some(hooks) = &self.hooks {
                            hooks.notify(&existing).await?;
                        }
                    }
                    (existing, false)
                }
                None => {
                    let download = Download::new(self.ids.generate(), request, self.clock.now());
                    self.store.add(&download).await?;
                    self.register_callback(&download, request).await?;
                    tracing::info!(download_id = %download.id, %key, "download created");
                    (download, true)
                }
            }
        };

        if enqueue {
            self.queue_tx
                .send(download.clone())
                .await
                .map_err(|_| anyhow!("job queue closed"))?;
        }
        Ok(download)
    }

    async fn register_callback(&self, download: &Download, request: &Request) -> Result<()> {
        let Some(callback) = request.callback.as_deref() else {
            return Ok(());
        };
        match &self.hooks {
            Some(hooks) => {
                hooks.register(&download.id, &request.id, callback).await?;
            }
            None => tracing::warn!(request_id = %request.id, "no hook service; callback ignored"),
        }
        Ok(())
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Download>> {
        self.store.find_by_id(id).await
    }

    pub async fn find_by_resource_key(&self, key: &ResourceKey) -> Result<Option<Download>> {
        self.store.find_by_resource_key(key).await
    }

    pub async fn list(&self, filter: DownloadFilter, page: Page) -> Result<Vec<Download>> {
        self.store.find_filtered(filter, page).await
    }

    pub async fn list_all(&self, page: Page) -> Result<Vec<Download>> {
        self.store.find_all(page).await
    }

    pub async fn list_finished(&self, page: Page) -> Result<Vec<Download>> {
        self.store.find_finished(page).await
    }

    pub async fn list_not_finished(&self, page: Page) -> Result<Vec<Download>> {
        self.store.find_not_finished(page).await
    }

    pub async fn list_in_progress(&self, page: Page) -> Result<Vec<Download>> {
        self.store.find_in_progress(page).await
    }

    pub async fn list_waiting(&self, page: Page) -> Result<Vec<Download>> {
        self.store.find_waiting(page).await
    }

    /// Remove the payload, then the record. If the payload cannot be removed
    /// the record is kept and the error returned. Downloads still queued or
    /// transferring are refused: their worker would recreate the payload.
    pub async fn delete(&self, download: &Download) -> Result<bool> {
        if let Some(current) = self.store.find_by_id(&download.id).await? {
            if !current.finished && !current.failed {
                anyhow::bail!("download {} is still queued or transferring", current.id);
            }
        }
        let blobs = self.blobs.clone();
        let target = download.clone();
        let had_blob = tokio::task::spawn_blocking(move || blobs.delete(&target))
            .await
            .context("blob delete task failed")?
            .with_context(|| format!("failed to delete payload of {}", download.id))?;
        let removed = self.store.delete(&download.id).await?;
        tracing::info!(download_id = %download.id, had_blob, removed, "download deleted");
        Ok(removed)
    }

    /// `Ok(false)` when no download has this id.
    pub async fn delete_by_id(&self, id: &str) -> Result<bool> {
        match self.store.find_by_id(id).await? {
            Some(download) => self.delete(&download).await,
            None => Ok(false),
        }
    }

    /// Whether the stored payload has the expected size.
    pub async fn verify(&self, download: &Download) -> Result<bool> {
        let blobs = self.blobs.clone();
        let target = download.clone();
        tokio::task::spawn_blocking(move || blobs.verify(&target))
            .await
            .context("verify task failed")?
    }

    pub fn reader(&self, download: &Download) -> Result<Box<dyn Read + Send>> {
        self.blobs.reader(download)
    }

    /// Re-hash the stored payload with the download's checksum kind.
    pub async fn recompute_checksum(&self, download: &Download) -> Result<ChecksumReport> {
        let kind = download.checksum_type;
        let mut reader = self.blobs.reader(download)?;
        let computed = tokio::task::spawn_blocking(move || digest_reader(kind, &mut reader))
            .await
            .context("checksum task failed")??;
        Ok(ChecksumReport {
            kind,
            recorded: download.checksum.clone(),
            computed,
        })
    }

    /// Statistics over one page of all downloads.
    pub async fn stats(&self, page: Page) -> Result<DownloadStats> {
        let downloads = self.store.find_all(page).await?;
        Ok(DownloadStats::from_downloads(&downloads, self.clock.now()))
    }

    /// Errors reported for downloads that do not exist.
    pub fn unattributed_errors(&self) -> Vec<DownloadError> {
        lock(&self.unattributed).clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.events.subscribe()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}
