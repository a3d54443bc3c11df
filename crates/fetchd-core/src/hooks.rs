//! Webhook registration and delivery.
//!
//! A [`Hook`] records one request's interest in one download. When the
//! download finishes, [`HookService::notify`] claims every pending hook and
//! POSTs the download's JSON view to each, once. Delivery runs in a detached
//! task; the outcome is stored on the hook as a [`HookResult`].

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;

use crate::clock::{Clock, IdGenerator};
use crate::config::HttpConfig;
use crate::model::{Download, DownloadView, Hook, HookResult};
use crate::store::{HookStore, Page};

/// Error type for webhook delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The POST never got a response (connection, DNS, timeout, etc.).
    #[error("webhook POST {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: curl::Error,
    },

    /// The remote server answered with something other than 200.
    #[error("webhook POST {url} returned HTTP {status}")]
    HttpStatus { url: String, status: u32 },

    #[error("webhook task failed: {0}")]
    Task(String),
}

impl WebhookError {
    pub fn status_code(&self) -> Option<u32> {
        match self {
            WebhookError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Sends one webhook request; returns the HTTP status on any response.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn post_json(&self, url: &str, body: Vec<u8>) -> Result<u32, WebhookError>;
}

/// libcurl POST with `Content-Type: application/json`, on the blocking pool.
#[derive(Debug, Clone)]
pub struct CurlWebhook {
    connect_timeout: Duration,
    timeout: Duration,
}

impl CurlWebhook {
    pub fn new(http: &HttpConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(http.connect_timeout_secs),
            timeout: Duration::from_secs(http.webhook_timeout_secs),
        }
    }

    fn post_blocking(&self, url: &str, body: &[u8]) -> Result<u32, curl::Error> {
        let mut easy = curl::easy::Easy::new();
        easy.url(url)?;
        easy.post(true)?;
        easy.post_fields_copy(body)?;
        easy.connect_timeout(self.connect_timeout)?;
        easy.timeout(self.timeout)?;
        let mut list = curl::easy::List::new();
        list.append("Content-Type: application/json")?;
        // No 100-continue round trip for larger bodies.
        list.append("Expect:")?;
        easy.http_headers(list)?;
        {
            let mut transfer = easy.transfer();
            transfer.write_function(|data| Ok(data.len()))?;
            transfer.perform()?;
        }
        easy.response_code()
    }
}

#[async_trait]
impl WebhookTransport for CurlWebhook {
    async fn post_json(&self, url: &str, body: Vec<u8>) -> Result<u32, WebhookError> {
        let this = self.clone();
        let target = url.to_string();
        tokio::task::spawn_blocking(move || this.post_blocking(&target, &body))
            .await
            .map_err(|e| WebhookError::Task(e.to_string()))?
            .map_err(|source| WebhookError::Request {
                url: url.to_string(),
                source,
            })
    }
}

pub struct HookService {
    store: Arc<dyn HookStore>,
    transport: Arc<dyn WebhookTransport>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    /// Hook ids currently being delivered.
    claimed: Arc<Mutex<HashSet<String>>>,
    deliveries: Mutex<JoinSet<()>>,
}

impl HookService {
    pub fn new(
        store: Arc<dyn HookStore>,
        transport: Arc<dyn WebhookTransport>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            store,
            transport,
            clock,
            ids,
            claimed: Arc::new(Mutex::new(HashSet::new())),
            deliveries: Mutex::new(JoinSet::new()),
        }
    }

    /// Persist a pending hook. The same pair may be registered more than once.
    pub async fn register(&self, download_id: &str, request_id: &str, url: &str) -> Result<Hook> {
        let hook = Hook {
            id: self.ids.generate(),
            download_id: download_id.to_string(),
            request_id: request_id.to_string(),
            url: url.to_string(),
            result: None,
        };
        self.store.add(&hook).await?;
        tracing::debug!(hook_id = %hook.id, download_id, url, "hook registered");
        Ok(hook)
    }

    /// Start delivery to every pending hook of `download`. Returns once the
    /// hooks are claimed; delivery continues in the background.
    pub async fn notify(&self, download: &Download) -> Result<()> {
        let candidates: Vec<String> = self
            .store
            .find_by_download_id(&download.id)
            .await?
            .into_iter()
            .filter(Hook::is_pending)
            .map(|h| h.id)
            .collect();
        if candidates.is_empty() {
            return Ok(());
        }

        let mine: HashSet<String> = {
            let mut claimed = lock(&self.claimed);
            candidates
                .into_iter()
                .filter(|id| claimed.insert(id.clone()))
                .collect()
        };
        if mine.is_empty() {
            return Ok(());
        }

        // A concurrent notify may have delivered and released a hook between
        // the read above and the claim; only hooks still pending now are ours.
        let fresh = match self.store.find_by_download_id(&download.id).await {
            Ok(hooks) => hooks,
            Err(e) => {
                release(&self.claimed, &mine);
                return Err(e);
            }
        };
        let mut to_deliver = Vec::new();
        let mut stale = HashSet::new();
        for hook in fresh.into_iter().filter(|h| mine.contains(&h.id)) {
            if hook.is_pending() {
                to_deliver.push(hook);
            } else {
                stale.insert(hook.id);
            }
        }
        release(&self.claimed, &stale);
        if to_deliver.is_empty() {
            return Ok(());
        }

        let body = serde_json::to_vec(&DownloadView::from(download))?;
        let store = self.store.clone();
        let transport = self.transport.clone();
        let clock = self.clock.clone();
        let claimed = self.claimed.clone();
        tracing::info!(download_id = %download.id, hooks = to_deliver.len(), "delivering webhooks");

        let mut deliveries = lock(&self.deliveries);
        while let Some(done) = deliveries.try_join_next() {
            if let Err(e) = done {
                tracing::warn!(error = %e, "webhook delivery task failed");
            }
        }
        deliveries.spawn(async move {
            for hook in to_deliver {
                deliver(hook, &body, store.as_ref(), transport.as_ref(), clock.as_ref(), &claimed).await;
            }
        });
        Ok(())
    }

    /// Wait for every delivery started so far.
    pub async fn drain(&self) {
        loop {
            let mut set = std::mem::take(&mut *lock(&self.deliveries));
            if set.is_empty() {
                return;
            }
            while let Some(done) = set.join_next().await {
                if let Err(e) = done {
                    tracing::warn!(error = %e, "webhook delivery task failed");
                }
            }
        }
    }

    pub async fn find_by_download_id(&self, download_id: &str) -> Result<Vec<Hook>> {
        self.store.find_by_download_id(download_id).await
    }

    pub async fn find_by_request_id(&self, request_id: &str) -> Result<Vec<Hook>> {
        self.store.find_by_request_id(request_id).await
    }

    pub async fn list_all(&self, page: Page) -> Result<Vec<Hook>> {
        self.store.list_all(page).await
    }
}

async fn deliver(
    mut hook: Hook,
    body: &[u8],
    store: &dyn HookStore,
    transport: &dyn WebhookTransport,
    clock: &dyn Clock,
    claimed: &Mutex<HashSet<String>>,
) {
    let outcome = match transport.post_json(&hook.url, body.to_vec()).await {
        Ok(200) => Ok(200),
        Ok(status) => Err(WebhookError::HttpStatus {
            url: hook.url.clone(),
            status,
        }),
        Err(e) => Err(e),
    };
    let result = match outcome {
        Ok(status) => HookResult {
            errors: Vec::new(),
            status_code: Some(status),
            time: clock.now(),
        },
        Err(e) => {
            tracing::warn!(hook_id = %hook.id, error = %e, "webhook delivery failed");
            HookResult {
                errors: vec![e.to_string()],
                status_code: e.status_code(),
                time: clock.now(),
            }
        }
    };
    hook.result = Some(result);
    match store.update(&hook).await {
        Ok(()) => {
            lock(claimed).remove(&hook.id);
        }
        // The claim stays so this process never posts the hook again.
        Err(e) => tracing::error!(hook_id = %hook.id, error = %e, "failed to store webhook result"),
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

fn release(claimed: &Mutex<HashSet<String>>, ids: &HashSet<String>) {
    let mut claimed = lock(claimed);
    for id in ids {
        claimed.remove(id);
    }
}
