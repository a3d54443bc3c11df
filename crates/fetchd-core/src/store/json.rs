//! In-process record stores mirrored to JSON files.
//!
//! Each entity lives in a [`JsonCollection`]: a `RwLock<Vec<T>>` in creation
//! order plus an optional file. A persisted mutation is applied to a copy,
//! written to disk, and only then swapped in, so a failed write leaves the
//! collection unchanged. Progress on unfinished downloads is kept in memory.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{DownloadFilter, DownloadStore, HookStore, Page, RequestStore, Stores};
use crate::model::{Download, Hook, Request, ResourceKey};

pub struct JsonCollection<T> {
    items: RwLock<Vec<T>>,
    path: Option<PathBuf>,
}

impl<T> JsonCollection<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    pub fn in_memory() -> Self {
        Self {
            items: RwLock::new(Vec::new()),
            path: None,
        }
    }

    /// Load from `path`; a missing file is an empty collection.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let items = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => Vec::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("failed to parse {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()))
            }
        };
        Ok(Self {
            items: RwLock::new(items),
            path: Some(path),
        })
    }

    pub async fn read<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        let guard = self.items.read().await;
        f(&guard)
    }

    /// Apply `f` and persist. Nothing changes if `f` or the write fails.
    pub async fn mutate<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Vec<T>) -> Result<R> + Send,
        R: Send,
    {
        let mut guard = self.items.write().await;
        let mut next = guard.clone();
        let out = f(&mut next)?;
        if let Some(path) = &self.path {
            persist(path, &next).await?;
        }
        *guard = next;
        Ok(out)
    }

    /// Apply `f` in memory only. The change reaches the file with the next
    /// [`mutate`](Self::mutate).
    pub async fn mutate_in_memory<R>(&self, f: impl FnOnce(&mut Vec<T>) -> Result<R>) -> Result<R> {
        let mut guard = self.items.write().await;
        f(&mut guard)
    }
}

async fn persist<T: Serialize>(path: &Path, items: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(items).context("failed to serialize records")?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, &bytes)
        .await
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

pub struct JsonDownloadStore {
    records: JsonCollection<Download>,
}

impl JsonDownloadStore {
    pub fn in_memory() -> Self {
        Self {
            records: JsonCollection::in_memory(),
        }
    }

    /// Load downloads from `path`, dropping any that never finished: their
    /// transfers died with the previous process and restart from byte zero.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let records = JsonCollection::<Download>::load(path).await?;
        let dropped = records
            .mutate(|items| {
                let before = items.len();
                items.retain(|d| d.finished);
                Ok(before - items.len())
            })
            .await?;
        if dropped > 0 {
            tracing::info!(dropped, "dropped unfinished downloads from previous run");
        }
        Ok(Self { records })
    }
}

#[async_trait]
impl DownloadStore for JsonDownloadStore {
    async fn add(&self, download: &Download) -> Result<()> {
        let key = download.resource_key();
        self.records
            .mutate(|items| {
                if items.iter().any(|d| d.id == download.id) {
                    anyhow::bail!("download {} already exists", download.id);
                }
                if items.iter().any(|d| d.resource_key() == key) {
                    anyhow::bail!("a download for {} already exists", key);
                }
                items.push(download.clone());
                Ok(())
            })
            .await
    }

    /// Only finished downloads survive a reload, so progress on unfinished
    /// ones stays in memory and the file is rewritten once per transfer.
    async fn update(&self, download: &Download) -> Result<()> {
        let apply = |items: &mut Vec<Download>| -> Result<()> {
            let slot = items
                .iter_mut()
                .find(|d| d.id == download.id)
                .with_context(|| format!("no download with id {}", download.id))?;
            // Key fields stay as created.
            let (url, metadata) = (slot.url.clone(), slot.metadata.clone());
            *slot = download.clone();
            slot.url = url;
            slot.metadata = metadata;
            Ok(())
        };
        if download.finished {
            self.records.mutate(apply).await
        } else {
            self.records.mutate_in_memory(apply).await
        }
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.records
            .mutate(|items| {
                let before = items.len();
                items.retain(|d| d.id != id);
                Ok(items.len() != before)
            })
            .await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Download>> {
        Ok(self
            .records
            .read(|items| items.iter().find(|d| d.id == id).cloned())
            .await)
    }

    async fn find_by_resource_key(&self, key: &ResourceKey) -> Result<Option<Download>> {
        Ok(self
            .records
            .read(|items| items.iter().find(|d| &d.resource_key() == key).cloned())
            .await)
    }

    async fn find_filtered(&self, filter: DownloadFilter, page: Page) -> Result<Vec<Download>> {
        Ok(self
            .records
            .read(|items| page.apply(items.iter().filter(|d| filter.matches(d)).cloned()))
            .await)
    }
}

pub struct JsonRequestStore {
    records: JsonCollection<Request>,
}

impl JsonRequestStore {
    pub fn in_memory() -> Self {
        Self {
            records: JsonCollection::in_memory(),
        }
    }

    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            records: JsonCollection::load(path).await?,
        })
    }
}

#[async_trait]
impl RequestStore for JsonRequestStore {
    async fn add(&self, request: &Request) -> Result<()> {
        self.records
            .mutate(|items| {
                if items.iter().any(|r| r.id == request.id) {
                    anyhow::bail!("request {} already exists", request.id);
                }
                items.push(request.clone());
                Ok(())
            })
            .await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Request>> {
        Ok(self
            .records
            .read(|items| items.iter().find(|r| r.id == id).cloned())
            .await)
    }

    async fn find_all(&self, page: Page) -> Result<Vec<Request>> {
        Ok(self.records.read(|items| page.apply(items.iter().cloned())).await)
    }
}

pub struct JsonHookStore {
    records: JsonCollection<Hook>,
}

impl JsonHookStore {
    pub fn in_memory() -> Self {
        Self {
            records: JsonCollection::in_memory(),
        }
    }

    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            records: JsonCollection::load(path).await?,
        })
    }
}

#[async_trait]
impl HookStore for JsonHookStore {
    async fn add(&self, hook: &Hook) -> Result<()> {
        self.records
            .mutate(|items| {
                if items.iter().any(|h| h.id == hook.id) {
                    anyhow::bail!("hook {} already exists", hook.id);
                }
                items.push(hook.clone());
                Ok(())
            })
            .await
    }

    async fn update(&self, hook: &Hook) -> Result<()> {
        self.records
            .mutate(|items| {
                let slot = items
                    .iter_mut()
                    .find(|h| h.id == hook.id)
                    .with_context(|| format!("no hook with id {}", hook.id))?;
                *slot = hook.clone();
                Ok(())
            })
            .await
    }

    async fn find_by_download_id(&self, download_id: &str) -> Result<Vec<Hook>> {
        Ok(self
            .records
            .read(|items| {
                items
                    .iter()
                    .filter(|h| h.download_id == download_id)
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn find_by_request_id(&self, request_id: &str) -> Result<Vec<Hook>> {
        Ok(self
            .records
            .read(|items| {
                items
                    .iter()
                    .filter(|h| h.request_id == request_id)
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn list_all(&self, page: Page) -> Result<Vec<Hook>> {
        Ok(self.records.read(|items| page.apply(items.iter().cloned())).await)
    }
}

/// JSON stores under `dir` (`downloads.json`, `requests.json`, `hooks.json`).
pub async fn open_dir(dir: &Path) -> Result<Stores> {
    Ok(Stores {
        downloads: Arc::new(JsonDownloadStore::load(dir.join("downloads.json")).await?),
        requests: Arc::new(JsonRequestStore::load(dir.join("requests.json")).await?),
        hooks: Arc::new(JsonHookStore::load(dir.join("hooks.json")).await?),
    })
}

pub fn in_memory() -> Stores {
    Stores {
        downloads: Arc::new(JsonDownloadStore::in_memory()),
        requests: Arc::new(JsonRequestStore::in_memory()),
        hooks: Arc::new(JsonHookStore::in_memory()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IncomingRequest, Metadata, StatusUpdate};
    use chrono::{Duration, TimeZone, Utc};

    fn download(id: &str, url: &str, etag: Option<&str>) -> Download {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let mut req = Request::from_incoming(IncomingRequest::new(url), t0);
        let mut meta = Metadata::new(200, t0);
        meta.etag = etag.map(str::to_string);
        req.metadata = Some(meta);
        Download::new(id, &req, t0)
    }

    fn progress(d: &mut Download, finished: bool) {
        d.apply_status_update(&StatusUpdate {
            download_id: d.id.clone(),
            bytes_read: 1,
            checksum: "c".into(),
            time: d.time_requested + Duration::seconds(1),
            finished,
        });
    }

    #[tokio::test]
    async fn add_rejects_duplicate_resource_key() {
        let store = JsonDownloadStore::in_memory();
        store.add(&download("a", "http://h/x", Some("e1"))).await.unwrap();
        assert!(store.add(&download("b", "http://h/x", Some("e1"))).await.is_err());
        // Same URL with a different ETag is a different resource.
        store.add(&download("c", "http://h/x", Some("e2"))).await.unwrap();
        store.add(&download("d", "http://h/x", None)).await.unwrap();

        let found = store
            .find_by_resource_key(&ResourceKey::new("http://h/x", ""))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "d");
    }

    #[tokio::test]
    async fn partitions_are_disjoint_and_cover_not_finished() {
        let store = JsonDownloadStore::in_memory();
        let waiting = download("w", "http://h/w", None);
        let mut running = download("r", "http://h/r", None);
        progress(&mut running, false);
        let mut done = download("f", "http://h/f", None);
        progress(&mut done, true);
        for d in [&waiting, &running, &done] {
            store.add(d).await.unwrap();
        }

        let ids = |v: Vec<Download>| v.into_iter().map(|d| d.id).collect::<Vec<_>>();
        assert_eq!(ids(store.find_waiting(Page::all()).await.unwrap()), vec!["w"]);
        assert_eq!(ids(store.find_in_progress(Page::all()).await.unwrap()), vec!["r"]);
        assert_eq!(ids(store.find_finished(Page::all()).await.unwrap()), vec!["f"]);
        assert_eq!(
            ids(store.find_not_finished(Page::all()).await.unwrap()),
            vec!["w", "r"]
        );
        assert_eq!(store.find_all(Page::all()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn paging_applies_after_filtering() {
        let store = JsonDownloadStore::in_memory();
        for i in 0..6 {
            let mut d = download(&format!("d{i}"), &format!("http://h/{i}"), None);
            if i % 2 == 0 {
                progress(&mut d, true);
            }
            store.add(&d).await.unwrap();
        }
        let page = store.find_finished(Page::new(1, 5)).await.unwrap();
        let ids: Vec<_> = page.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["d2", "d4"]);
    }

    #[tokio::test]
    async fn update_keeps_resource_key() {
        let store = JsonDownloadStore::in_memory();
        let d = download("a", "http://h/x", Some("e1"));
        store.add(&d).await.unwrap();

        let mut changed = d.clone();
        changed.url = "http://elsewhere/y".into();
        changed.metadata = None;
        progress(&mut changed, true);
        store.update(&changed).await.unwrap();

        let stored = store.find_by_id("a").await.unwrap().unwrap();
        assert!(stored.finished);
        assert_eq!(stored.resource_key(), ResourceKey::new("http://h/x", "e1"));
    }

    #[tokio::test]
    async fn delete_unknown_is_false() {
        let store = JsonDownloadStore::in_memory();
        assert!(!store.delete("nope").await.unwrap());
        store.add(&download("a", "http://h/x", None)).await.unwrap();
        assert!(store.delete("a").await.unwrap());
        assert!(store.find_by_id("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reload_drops_unfinished_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("downloads.json");
        {
            let store = JsonDownloadStore::load(&path).await.unwrap();
            let mut done = download("done", "http://h/1", None);
            progress(&mut done, true);
            store.add(&done).await.unwrap();
            store.add(&download("pending", "http://h/2", None)).await.unwrap();
        }
        let store = JsonDownloadStore::load(&path).await.unwrap();
        let all = store.find_all(Page::all()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "done");
    }

    #[tokio::test]
    async fn progress_is_written_only_on_finish() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("downloads.json");
        let on_disk = || -> Vec<Download> {
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap()
        };
        let store = JsonDownloadStore::load(&path).await.unwrap();
        let mut d = download("a", "http://h/x", None);
        store.add(&d).await.unwrap();

        progress(&mut d, false);
        store.update(&d).await.unwrap();
        assert_eq!(store.find_by_id("a").await.unwrap().unwrap().status.bytes_read, 1);
        assert_eq!(on_disk()[0].status.bytes_read, 0);

        progress(&mut d, true);
        store.update(&d).await.unwrap();
        let written = on_disk();
        assert!(written[0].finished);
        assert_eq!(written[0].status.bytes_read, 2);
    }

    #[tokio::test]
    async fn hooks_persist_and_filter() {
        let dir = tempfile::tempdir().unwrap();
        let stores = open_dir(dir.path()).await.unwrap();
        let hook = Hook {
            id: "h1".into(),
            download_id: "d1".into(),
            request_id: "r1".into(),
            url: "http://cb/".into(),
            result: None,
        };
        stores.hooks.add(&hook).await.unwrap();
        stores
            .hooks
            .add(&Hook {
                id: "h2".into(),
                request_id: "r2".into(),
                ..hook.clone()
            })
            .await
            .unwrap();

        let reopened = open_dir(dir.path()).await.unwrap();
        assert_eq!(reopened.hooks.find_by_download_id("d1").await.unwrap().len(), 2);
        let by_request = reopened.hooks.find_by_request_id("r2").await.unwrap();
        assert_eq!(by_request.len(), 1);
        assert_eq!(by_request[0].id, "h2");
        assert!(reopened.hooks.update(&Hook { id: "zz".into(), ..hook }).await.is_err());
    }
}
