//! Record stores for downloads, requests and hooks.
//!
//! Two backends implement the same async traits: [`json`] keeps records in
//! memory and mirrors them to JSON files, [`sqlite`] keeps one document per
//! row in an SQLite database via sqlx.

pub mod json;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::{FetchdConfig, StoreBackend};
use crate::model::{Download, Hook, Request, ResourceKey};

/// Default number of records per page.
pub const DEFAULT_PAGE_LIMIT: usize = 25;

/// Offset/limit window over an ordered listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }

    /// Every record.
    pub fn all() -> Self {
        Self {
            offset: 0,
            limit: usize::MAX,
        }
    }

    /// Apply to an already filtered, ordered sequence.
    pub fn apply<T, I: IntoIterator<Item = T>>(&self, items: I) -> Vec<T> {
        items.into_iter().skip(self.offset).take(self.limit).collect()
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

/// Download partitions used by the listing operations.
///
/// `InProgress` and `Waiting` split `NotFinished` by whether the first
/// status update has arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DownloadFilter {
    #[default]
    All,
    Finished,
    NotFinished,
    InProgress,
    Waiting,
}

impl DownloadFilter {
    pub fn matches(self, d: &Download) -> bool {
        match self {
            DownloadFilter::All => true,
            DownloadFilter::Finished => d.finished,
            DownloadFilter::NotFinished => !d.finished,
            DownloadFilter::InProgress => d.is_in_progress(),
            DownloadFilter::Waiting => d.is_waiting(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DownloadFilter::All => "all",
            DownloadFilter::Finished => "finished",
            DownloadFilter::NotFinished => "not-finished",
            DownloadFilter::InProgress => "in-progress",
            DownloadFilter::Waiting => "waiting",
        }
    }
}

impl fmt::Display for DownloadFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DownloadFilter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(DownloadFilter::All),
            "finished" => Ok(DownloadFilter::Finished),
            "not-finished" => Ok(DownloadFilter::NotFinished),
            "in-progress" => Ok(DownloadFilter::InProgress),
            "waiting" => Ok(DownloadFilter::Waiting),
            other => anyhow::bail!("unknown download filter: {}", other),
        }
    }
}

#[async_trait]
pub trait DownloadStore: Send + Sync {
    /// Insert a new download. Fails if its id or resource key is taken.
    async fn add(&self, download: &Download) -> Result<()>;

    /// Replace a stored download by id. The resource key is never re-indexed.
    async fn update(&self, download: &Download) -> Result<()>;

    /// Remove by id; `Ok(false)` when there was no such record.
    async fn delete(&self, id: &str) -> Result<bool>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Download>>;

    async fn find_by_resource_key(&self, key: &ResourceKey) -> Result<Option<Download>>;

    /// Downloads matching `filter` in creation order, then paged.
    async fn find_filtered(&self, filter: DownloadFilter, page: Page) -> Result<Vec<Download>>;

    async fn find_all(&self, page: Page) -> Result<Vec<Download>> {
        self.find_filtered(DownloadFilter::All, page).await
    }

    async fn find_finished(&self, page: Page) -> Result<Vec<Download>> {
        self.find_filtered(DownloadFilter::Finished, page).await
    }

    async fn find_not_finished(&self, page: Page) -> Result<Vec<Download>> {
        self.find_filtered(DownloadFilter::NotFinished, page).await
    }

    async fn find_in_progress(&self, page: Page) -> Result<Vec<Download>> {
        self.find_filtered(DownloadFilter::InProgress, page).await
    }

    async fn find_waiting(&self, page: Page) -> Result<Vec<Download>> {
        self.find_filtered(DownloadFilter::Waiting, page).await
    }
}

#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn add(&self, request: &Request) -> Result<()>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Request>>;

    async fn find_all(&self, page: Page) -> Result<Vec<Request>>;
}

#[async_trait]
pub trait HookStore: Send + Sync {
    async fn add(&self, hook: &Hook) -> Result<()>;

    async fn update(&self, hook: &Hook) -> Result<()>;

    async fn find_by_download_id(&self, download_id: &str) -> Result<Vec<Hook>>;

    async fn find_by_request_id(&self, request_id: &str) -> Result<Vec<Hook>>;

    async fn list_all(&self, page: Page) -> Result<Vec<Hook>>;
}

/// The three record stores of one backend.
#[derive(Clone)]
pub struct Stores {
    pub downloads: Arc<dyn DownloadStore>,
    pub requests: Arc<dyn RequestStore>,
    pub hooks: Arc<dyn HookStore>,
}

impl Stores {
    /// Open the backend selected in the config under its data directory.
    pub async fn open(cfg: &FetchdConfig) -> Result<Self> {
        let data_dir = cfg.data_dir()?;
        match cfg.store {
            StoreBackend::Json => json::open_dir(&data_dir).await,
            StoreBackend::Sqlite => {
                let db = sqlite::SqliteStore::open_at(data_dir.join("fetchd.db")).await?;
                Ok(db.into_stores())
            }
        }
    }

    /// Non-persistent stores.
    pub fn in_memory() -> Self {
        json::in_memory()
    }
}
