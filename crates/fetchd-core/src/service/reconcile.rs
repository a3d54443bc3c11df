//! The reconciliation loop: the only writer of queued downloads.

use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

use super::{lock, DownloadEvent, DownloadService};
use crate::model::{DownloadError, StatusUpdate};

/// Message for a status update whose download does not exist.
pub(crate) const STATUS_BEFORE_METADATA: &str = "status received before metadata";

pub(super) async fn run(
    service: Arc<DownloadService>,
    mut status_rx: UnboundedReceiver<StatusUpdate>,
    mut error_rx: UnboundedReceiver<DownloadError>,
) {
    loop {
        tokio::select! {
            // Progress first: a worker always reports its start before any error.
            biased;
            Some(update) = status_rx.recv() => service.apply_status(update).await,
            Some(err) = error_rx.recv() => service.apply_error(err).await,
            else => break,
        }
    }
    tracing::debug!("reconciliation loop stopped");
}

impl DownloadService {
    pub(super) async fn apply_status(&self, update: StatusUpdate) {
        let mut download = match self.store.find_by_id(&update.download_id).await {
            Ok(Some(d)) => d,
            Ok(None) => {
                let err = DownloadError::new(
                    update.download_id.clone(),
                    STATUS_BEFORE_METADATA,
                    self.clock.now(),
                );
                if self.error_tx.send(err).is_err() {
                    tracing::warn!(download_id = %update.download_id, "error channel closed");
                }
                return;
            }
            Err(e) => {
                tracing::error!(download_id = %update.download_id, error = %format!("{e:#}"), "status lookup failed");
                return;
            }
        };

        if download.finished {
            tracing::debug!(download_id = %download.id, "update after finish ignored");
            return;
        }

        if !download.apply_status_update(&update) {
            if let Err(e) = self.store.update(&download).await {
                tracing::error!(download_id = %download.id, error = %format!("{e:#}"), "failed to store progress");
            }
            return;
        }

        // Held so a concurrent duplicate request either sees the download
        // finished or has its hook registered before notify reads the hooks.
        let _guard = self.create_lock.lock().await;
        if let Err(e) = self.store.update(&download).await {
            tracing::error!(download_id = %download.id, error = %format!("{e:#}"), "failed to store finished download");
            return;
        }
        tracing::info!(
            download_id = %download.id,
            bytes = download.status.bytes_read,
            checksum = %download.checksum,
            "download finished"
        );
        if let Some(hooks) = &self.hooks {
            if let Err(e) = hooks.notify(&download).await {
                tracing::error!(download_id = %download.id, error = %format!("{e:#}"), "webhook notify failed");
            }
        }
        let _ = self.events.send(DownloadEvent::Finished(download));
    }

    pub(super) async fn apply_error(&self, err: DownloadError) {
        let mut download = match self.store.find_by_id(&err.download_id).await {
            Ok(Some(d)) => d,
            Ok(None) => {
                tracing::warn!(download_id = %err.download_id, error = %err.message, "error for unknown download");
                lock(&self.unattributed).push(err);
                return;
            }
            Err(e) => {
                tracing::error!(download_id = %err.download_id, error = %format!("{e:#}"), "error lookup failed");
                lock(&self.unattributed).push(err);
                return;
            }
        };

        let was_finished = download.finished;
        download.mark_failed(err);
        if let Err(e) = self.store.update(&download).await {
            tracing::error!(download_id = %download.id, error = %format!("{e:#}"), "failed to store download error");
            return;
        }
        if !was_finished {
            let _ = self.events.send(DownloadEvent::Failed(download));
        }
    }
}
