//! Wiring of the record stores, the blob store and the three services.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::blob_store::{BlobStore, LocalBlobStore};
use crate::clock::{self, Clock, IdGenerator};
use crate::config::FetchdConfig;
use crate::hooks::{CurlWebhook, HookService, WebhookTransport};
use crate::probe::{CurlProber, Prober};
use crate::request_service::RequestService;
use crate::service::{DownloadService, ServiceSettings};
use crate::store::Stores;

/// A running fetchd instance.
pub struct Services {
    pub downloads: Arc<DownloadService>,
    pub requests: RequestService,
    pub hooks: Arc<HookService>,
}

impl Services {
    /// Open the configured stores and start the workers. Must run inside a
    /// tokio runtime.
    pub async fn open(cfg: &FetchdConfig) -> Result<Self> {
        cfg.validate()?;
        let stores = Stores::open(cfg).await?;
        let blob_dir = cfg.blob_dir()?;
        let blobs = LocalBlobStore::new(&blob_dir)
            .with_context(|| format!("failed to open blob store at {}", blob_dir.display()))?;
        let (clock, ids) = clock::system();
        tracing::info!(store = ?cfg.store, blobs = %blob_dir.display(), "opening services");
        Self::with_parts(
            ServiceSettings::from(cfg),
            stores,
            Arc::new(blobs),
            Arc::new(CurlWebhook::new(&cfg.http)),
            Arc::new(CurlProber::new(cfg.http.clone())),
            clock,
            ids,
        )
    }

    /// Assemble and start services from explicit parts.
    pub fn with_parts(
        settings: ServiceSettings,
        stores: Stores,
        blobs: Arc<dyn BlobStore>,
        webhook: Arc<dyn WebhookTransport>,
        prober: Arc<dyn Prober>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Self> {
        let hooks = Arc::new(HookService::new(
            stores.hooks,
            webhook,
            clock.clone(),
            ids.clone(),
        ));
        let downloads = DownloadService::new(
            settings,
            stores.downloads,
            blobs,
            Some(hooks.clone()),
            clock.clone(),
            ids.clone(),
        );
        downloads.start()?;
        let requests = RequestService::new(
            stores.requests,
            downloads.clone(),
            Some(hooks.clone()),
            prober,
            clock,
            ids,
        );
        Ok(Self {
            downloads,
            requests,
            hooks,
        })
    }

    /// Wait for pending webhook deliveries, then stop the workers.
    pub async fn shutdown(&self) {
        self.hooks.drain().await;
        self.downloads.shutdown();
    }
}
