//! Entry point for client submissions.
//!
//! Every submission that passes validation becomes a stored [`Request`],
//! whether or not it led to a download; probe and hand-off failures are kept
//! on the request itself.

use anyhow::Result;
use std::sync::Arc;

use crate::clock::{Clock, IdGenerator};
use crate::hooks::HookService;
use crate::model::{Hook, IncomingRequest, Request};
use crate::probe::Prober;
use crate::service::DownloadService;
use crate::store::{Page, RequestStore};

pub struct RequestService {
    store: Arc<dyn RequestStore>,
    downloads: Arc<DownloadService>,
    hooks: Option<Arc<HookService>>,
    prober: Arc<dyn Prober>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl RequestService {
    pub fn new(
        store: Arc<dyn RequestStore>,
        downloads: Arc<DownloadService>,
        hooks: Option<Arc<HookService>>,
        prober: Arc<dyn Prober>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            store,
            downloads,
            hooks,
            prober,
            clock,
            ids,
        }
    }

    /// Validate and process a client submission. A [`ValidationError`] is
    /// returned before anything is created or stored.
    ///
    /// [`ValidationError`]: crate::model::ValidationError
    pub async fn submit(&self, incoming: IncomingRequest) -> Result<Request> {
        incoming.validate()?;
        let request = Request::from_incoming(incoming, self.clock.now());
        self.process_new_request(request).await
    }

    /// Probe the URL and hand the request to the download service. The
    /// request is stored at the end in every case; only a store failure is
    /// returned as an error.
    pub async fn process_new_request(&self, mut request: Request) -> Result<Request> {
        request.id = self.ids.generate();
        request.time_requested = self.clock.now();
        let url = request.url.clone();

        match self.prober.head(&url, request.time_requested).await {
            Err(e) => {
                tracing::warn!(request_id = %request.id, url = %url, error = %format!("{e:#}"), "HEAD probe failed");
                request.add_error(format!("{e:#}"), self.clock.now());
            }
            Ok(meta) if !meta.is_ok() => {
                let msg = format!("HEAD {} returned HTTP {}", url, meta.status_code);
                tracing::info!(request_id = %request.id, status = meta.status_code, "{}", msg);
                request.metadata = Some(meta);
                request.add_error(msg, self.clock.now());
            }
            Ok(meta) => {
                request.metadata = Some(meta);
                match self.downloads.process_request(&request).await {
                    Ok(download) => {
                        tracing::info!(request_id = %request.id, download_id = %download.id, "request linked");
                        request.download_id = Some(download.id);
                    }
                    Err(e) => {
                        tracing::error!(request_id = %request.id, error = %format!("{e:#}"), "download hand-off failed");
                        request.add_error(format!("{e:#}"), self.clock.now());
                    }
                }
            }
        }

        self.store.add(&request).await?;
        Ok(request)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Request>> {
        self.store.find_by_id(id).await
    }

    pub async fn list_all(&self, page: Page) -> Result<Vec<Request>> {
        self.store.find_all(page).await
    }

    /// Hooks registered on behalf of a request (empty without a hook service).
    pub async fn hooks_for_request(&self, request_id: &str) -> Result<Vec<Hook>> {
        match &self.hooks {
            Some(hooks) => hooks.find_by_request_id(request_id).await,
            None => Ok(Vec::new()),
        }
    }
}
