//! SQLite-backed record stores (sqlx).
//!
//! Each table keeps the record as a JSON document next to the columns the
//! queries need. `seq` preserves creation order for listings.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;
use std::sync::Arc;

use super::{DownloadFilter, DownloadStore, HookStore, Page, RequestStore, Stores};
use crate::model::{Download, DownloadError, Hook, Request, ResourceKey};

/// Error recorded on downloads cut off by the end of the previous process.
pub(crate) const INTERRUPTED: &str = "transfer interrupted by shutdown";

/// Percent-encode a path for use in a sqlite:// URI so spaces and special chars don't break parsing.
fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    format!("sqlite://{}", out)
}

fn unix_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

fn limit_offset(page: Page) -> (i64, i64) {
    (
        i64::try_from(page.limit).unwrap_or(i64::MAX),
        i64::try_from(page.offset).unwrap_or(i64::MAX),
    )
}

fn decode<T: DeserializeOwned>(row: &SqliteRow) -> Result<T> {
    let doc: String = row.get("doc");
    serde_json::from_str(&doc).context("corrupt record document")
}

fn decode_all<T: DeserializeOwned>(rows: &[SqliteRow]) -> Result<Vec<T>> {
    rows.iter().map(decode).collect()
}

/// Handle to the fetchd database.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (or create) the database at a specific path. Creates parent dirs if needed.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let uri = path_to_sqlite_uri(path) + "?mode=rwc";
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&uri)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;
        let db = SqliteStore { pool };
        db.migrate().await?;
        let interrupted = db.recover_interrupted().await?;
        if interrupted > 0 {
            tracing::info!(interrupted, "marked downloads from previous run as failed");
        }
        Ok(db)
    }

    /// Mark every unfinished download that is not already failed as failed.
    /// Their transfers died with the previous process; the next request for
    /// the same resource queues them again from byte zero. Call once at
    /// startup, before any worker runs.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query("SELECT doc FROM downloads WHERE finished = 0")
            .fetch_all(&mut *tx)
            .await?;
        let now = chrono::Utc::now();
        let mut count = 0;
        for row in &rows {
            let mut download: Download = decode(row)?;
            if download.failed {
                continue;
            }
            download.mark_failed(DownloadError::new(
                download.id.clone(),
                INTERRUPTED,
                now,
            ));
            sqlx::query("UPDATE downloads SET doc = ?1, updated_at = ?2 WHERE id = ?3")
                .bind(serde_json::to_string(&download)?)
                .bind(now.timestamp())
                .bind(&download.id)
                .execute(&mut *tx)
                .await?;
            count += 1;
        }
        tx.commit().await?;
        Ok(count)
    }

    /// Open an in-memory database (no disk I/O). One connection, so every
    /// query sees the same database.
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let db = SqliteStore { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        // - `etag` is '' when the server sent none, so UNIQUE(url, etag) covers
        //   the no-ETag key as well.
        // - `started` mirrors `time_started IS NOT NULL` for the partitions.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS downloads (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                url TEXT NOT NULL,
                etag TEXT NOT NULL DEFAULT '',
                finished INTEGER NOT NULL DEFAULT 0,
                started INTEGER NOT NULL DEFAULT 0,
                doc TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE (url, etag)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS requests (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                doc TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS hooks (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                download_id TEXT NOT NULL,
                request_id TEXT NOT NULL,
                doc TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS hooks_download ON hooks (download_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS hooks_request ON hooks (request_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub fn downloads(&self) -> SqliteDownloadStore {
        SqliteDownloadStore {
            pool: self.pool.clone(),
        }
    }

    pub fn requests(&self) -> SqliteRequestStore {
        SqliteRequestStore {
            pool: self.pool.clone(),
        }
    }

    pub fn hooks(&self) -> SqliteHookStore {
        SqliteHookStore {
            pool: self.pool.clone(),
        }
    }

    pub fn into_stores(self) -> Stores {
        Stores {
            downloads: Arc::new(self.downloads()),
            requests: Arc::new(self.requests()),
            hooks: Arc::new(self.hooks()),
        }
    }
}

pub struct SqliteDownloadStore {
    pool: Pool<Sqlite>,
}

fn filter_clause(filter: DownloadFilter) -> &'static str {
    match filter {
        DownloadFilter::All => "1 = 1",
        DownloadFilter::Finished => "finished = 1",
        DownloadFilter::NotFinished => "finished = 0",
        DownloadFilter::InProgress => "finished = 0 AND started = 1",
        DownloadFilter::Waiting => "finished = 0 AND started = 0",
    }
}

#[async_trait]
impl DownloadStore for SqliteDownloadStore {
    async fn add(&self, download: &Download) -> Result<()> {
        let now = unix_timestamp();
        let key = download.resource_key();
        let doc = serde_json::to_string(download)?;
        sqlx::query(
            r#"
            INSERT INTO downloads (id, url, etag, finished, started, doc, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&download.id)
        .bind(&key.url)
        .bind(&key.etag)
        .bind(download.finished)
        .bind(download.time_started.is_some())
        .bind(doc)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to insert download {} for {}", download.id, key))?;
        Ok(())
    }

    async fn update(&self, download: &Download) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT doc FROM downloads WHERE id = ?1")
            .bind(&download.id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            anyhow::bail!("no download with id {}", download.id);
        };
        let stored: Download = decode(&row)?;

        // Key fields stay as created.
        let mut next = download.clone();
        next.url = stored.url;
        next.metadata = stored.metadata;
        let doc = serde_json::to_string(&next)?;

        sqlx::query(
            r#"
            UPDATE downloads
            SET finished = ?1,
                started = ?2,
                doc = ?3,
                updated_at = ?4
            WHERE id = ?5
            "#,
        )
        .bind(next.finished)
        .bind(next.time_started.is_some())
        .bind(doc)
        .bind(unix_timestamp())
        .bind(&next.id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let r = sqlx::query("DELETE FROM downloads WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected() > 0)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Download>> {
        let row = sqlx::query("SELECT doc FROM downloads WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn find_by_resource_key(&self, key: &ResourceKey) -> Result<Option<Download>> {
        let row = sqlx::query("SELECT doc FROM downloads WHERE url = ?1 AND etag = ?2")
            .bind(&key.url)
            .bind(&key.etag)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn find_filtered(&self, filter: DownloadFilter, page: Page) -> Result<Vec<Download>> {
        let (limit, offset) = limit_offset(page);
        let sql = format!(
            "SELECT doc FROM downloads WHERE {} ORDER BY seq ASC LIMIT ?1 OFFSET ?2",
            filter_clause(filter)
        );
        let rows = sqlx::query(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        decode_all(&rows)
    }
}

pub struct SqliteRequestStore {
    pool: Pool<Sqlite>,
}

#[async_trait]
impl RequestStore for SqliteRequestStore {
    async fn add(&self, request: &Request) -> Result<()> {
        let doc = serde_json::to_string(request)?;
        sqlx::query("INSERT INTO requests (id, doc, created_at) VALUES (?1, ?2, ?3)")
            .bind(&request.id)
            .bind(doc)
            .bind(unix_timestamp())
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to insert request {}", request.id))?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Request>> {
        let row = sqlx::query("SELECT doc FROM requests WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn find_all(&self, page: Page) -> Result<Vec<Request>> {
        let (limit, offset) = limit_offset(page);
        let rows = sqlx::query("SELECT doc FROM requests ORDER BY seq ASC LIMIT ?1 OFFSET ?2")
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        decode_all(&rows)
    }
}

pub struct SqliteHookStore {
    pool: Pool<Sqlite>,
}

#[async_trait]
impl HookStore for SqliteHookStore {
    async fn add(&self, hook: &Hook) -> Result<()> {
        let doc = serde_json::to_string(hook)?;
        sqlx::query(
            "INSERT INTO hooks (id, download_id, request_id, doc) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&hook.id)
        .bind(&hook.download_id)
        .bind(&hook.request_id)
        .bind(doc)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to insert hook {}", hook.id))?;
        Ok(())
    }

    async fn update(&self, hook: &Hook) -> Result<()> {
        let doc = serde_json::to_string(hook)?;
        let r = sqlx::query("UPDATE hooks SET doc = ?1 WHERE id = ?2")
            .bind(doc)
            .bind(&hook.id)
            .execute(&self.pool)
            .await?;
        if r.rows_affected() == 0 {
            anyhow::bail!("no hook with id {}", hook.id);
        }
        Ok(())
    }

    async fn find_by_download_id(&self, download_id: &str) -> Result<Vec<Hook>> {
        let rows = sqlx::query("SELECT doc FROM hooks WHERE download_id = ?1 ORDER BY seq ASC")
            .bind(download_id)
            .fetch_all(&self.pool)
            .await?;
        decode_all(&rows)
    }

    async fn find_by_request_id(&self, request_id: &str) -> Result<Vec<Hook>> {
        let rows = sqlx::query("SELECT doc FROM hooks WHERE request_id = ?1 ORDER BY seq ASC")
            .bind(request_id)
            .fetch_all(&self.pool)
            .await?;
        decode_all(&rows)
    }

    async fn list_all(&self, page: Page) -> Result<Vec<Hook>> {
        let (limit, offset) = limit_offset(page);
        let rows = sqlx::query("SELECT doc FROM hooks ORDER BY seq ASC LIMIT ?1 OFFSET ?2")
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        decode_all(&rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HookResult, IncomingRequest, Metadata, StatusUpdate};
    use chrono::{Duration, TimeZone, Utc};

    fn download(id: &str, url: &str, etag: Option<&str>) -> Download {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let mut req = Request::from_incoming(IncomingRequest::new(url), t0);
        let mut meta = Metadata::new(200, t0);
        meta.etag = etag.map(str::to_string);
        req.metadata = Some(meta);
        Download::new(id, &req, t0)
    }

    fn advance(d: &mut Download, finished: bool) {
        d.apply_status_update(&StatusUpdate {
            download_id: d.id.clone(),
            bytes_read: 10,
            checksum: "abc".into(),
            time: d.time_requested + Duration::seconds(3),
            finished,
        });
    }

    #[test]
    fn sqlite_uri_escapes_special_chars() {
        assert_eq!(
            path_to_sqlite_uri(Path::new("/tmp/my data/#1.db")),
            "sqlite:///tmp/my%20data/%231.db"
        );
    }

    #[tokio::test]
    async fn resource_key_is_unique() {
        let db = SqliteStore::open_memory().await.unwrap();
        let store = db.downloads();
        store.add(&download("a", "http://h/x", None)).await.unwrap();
        assert!(store.add(&download("b", "http://h/x", None)).await.is_err());
        store.add(&download("c", "http://h/x", Some("v2"))).await.unwrap();

        let found = store
            .find_by_resource_key(&ResourceKey::new("http://h/x", "v2"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "c");
        assert!(store
            .find_by_resource_key(&ResourceKey::new("http://h/y", ""))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn update_moves_between_partitions() {
        let db = SqliteStore::open_memory().await.unwrap();
        let store = db.downloads();
        let mut d = download("a", "http://h/x", None);
        store.add(&d).await.unwrap();
        assert_eq!(store.find_waiting(Page::all()).await.unwrap().len(), 1);

        advance(&mut d, false);
        store.update(&d).await.unwrap();
        assert!(store.find_waiting(Page::all()).await.unwrap().is_empty());
        assert_eq!(store.find_in_progress(Page::all()).await.unwrap().len(), 1);

        advance(&mut d, true);
        store.update(&d).await.unwrap();
        assert!(store.find_not_finished(Page::all()).await.unwrap().is_empty());
        let done = store.find_finished(Page::all()).await.unwrap();
        assert_eq!(done[0].status.bytes_read, 20);
        assert!(done[0].finished);
    }

    #[tokio::test]
    async fn update_never_rewrites_key() {
        let db = SqliteStore::open_memory().await.unwrap();
        let store = db.downloads();
        let d = download("a", "http://h/x", Some("e1"));
        store.add(&d).await.unwrap();

        let mut moved = d.clone();
        moved.url = "http://other/".into();
        moved.metadata = None;
        store.update(&moved).await.unwrap();

        let key = ResourceKey::new("http://h/x", "e1");
        assert_eq!(store.find_by_resource_key(&key).await.unwrap().unwrap().resource_key(), key);
        assert!(store.update(&download("zz", "http://h/z", None)).await.is_err());
    }

    #[tokio::test]
    async fn reopen_marks_unfinished_downloads_failed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fetchd.db");
        {
            let db = SqliteStore::open_at(&path).await.unwrap();
            let store = db.downloads();
            store.add(&download("waiting", "http://h/w", None)).await.unwrap();
            let mut running = download("running", "http://h/r", None);
            store.add(&running).await.unwrap();
            advance(&mut running, false);
            store.update(&running).await.unwrap();
            let mut done = download("done", "http://h/d", None);
            store.add(&done).await.unwrap();
            advance(&mut done, true);
            store.update(&done).await.unwrap();
            db.pool.close().await;
        }

        let db = SqliteStore::open_at(&path).await.unwrap();
        let store = db.downloads();
        for id in ["waiting", "running"] {
            let d = store.find_by_id(id).await.unwrap().unwrap();
            assert!(d.failed, "{id}");
            assert!(!d.finished, "{id}");
            assert_eq!(d.errors.last().map(|e| e.message.as_str()), Some(INTERRUPTED));
        }
        let done = store.find_by_id("done").await.unwrap().unwrap();
        assert!(done.finished);
        assert!(!done.failed);
        assert!(done.errors.is_empty());

        // Already failed downloads are not marked twice.
        assert_eq!(db.recover_interrupted().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn paging_is_in_creation_order() {
        let db = SqliteStore::open_memory().await.unwrap();
        let store = db.downloads();
        for i in 0..5 {
            store
                .add(&download(&format!("d{i}"), &format!("http://h/{i}"), None))
                .await
                .unwrap();
        }
        let page = store.find_all(Page::new(1, 2)).await.unwrap();
        let ids: Vec<_> = page.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["d1", "d2"]);
        assert!(store.delete("d1").await.unwrap());
        assert!(!store.delete("d1").await.unwrap());
        assert_eq!(store.find_all(Page::all()).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn requests_and_hooks_round_trip() {
        let db = SqliteStore::open_memory().await.unwrap();
        let stores = db.into_stores();
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

        let mut req = Request::from_incoming(IncomingRequest::new("http://h/x"), t0);
        req.id = "r1".into();
        req.add_error("HEAD http://h/x returned HTTP 404", t0);
        stores.requests.add(&req).await.unwrap();
        assert_eq!(stores.requests.find_by_id("r1").await.unwrap(), Some(req));

        let mut hook = Hook {
            id: "h1".into(),
            download_id: "d1".into(),
            request_id: "r1".into(),
            url: "http://cb/".into(),
            result: None,
        };
        stores.hooks.add(&hook).await.unwrap();
        hook.result = Some(HookResult {
            errors: vec![],
            status_code: Some(200),
            time: t0,
        });
        stores.hooks.update(&hook).await.unwrap();

        let by_download = stores.hooks.find_by_download_id("d1").await.unwrap();
        assert_eq!(by_download, vec![hook.clone()]);
        assert_eq!(stores.hooks.find_by_request_id("r1").await.unwrap().len(), 1);
        assert_eq!(stores.hooks.list_all(Page::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn open_at_persists_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("fetchd.db");
        {
            let db = SqliteStore::open_at(&path).await.unwrap();
            db.downloads().add(&download("a", "http://h/x", None)).await.unwrap();
        }
        let db = SqliteStore::open_at(&path).await.unwrap();
        assert!(db.downloads().find_by_id("a").await.unwrap().is_some());
    }
}
