//! `fetchd list`, `fetchd show <id>` and `fetchd requests`.

use anyhow::Result;
use fetchd_core::model::DownloadView;
use fetchd_core::store::{DownloadFilter, Page};
use fetchd_core::Services;

use super::require_download;

pub async fn run_list(services: &Services, filter: DownloadFilter, page: Page) -> Result<()> {
    let downloads = services.downloads.list(filter, page).await?;
    if downloads.is_empty() {
        println!("No {} downloads.", filter);
        return Ok(());
    }
    println!("{:<38} {:<12} {:<12} {:<8} {}", "ID", "STATE", "BYTES", "PCT", "URL");
    for d in downloads {
        let state = if d.finished {
            "finished"
        } else if d.failed {
            "failed"
        } else if d.is_in_progress() {
            "in-progress"
        } else {
            "waiting"
        };
        let pct = d
            .percent_complete()
            .map(|p| format!("{p:.1}"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<38} {:<12} {:<12} {:<8} {}",
            d.id, state, d.status.bytes_read, pct, d.url
        );
    }
    Ok(())
}

pub async fn run_show(services: &Services, id: &str) -> Result<()> {
    let download = require_download(services, id).await?;
    let view = DownloadView::from(&download);
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

pub async fn run_requests(services: &Services, page: Page) -> Result<()> {
    let requests = services.requests.list_all(page).await?;
    if requests.is_empty() {
        println!("No requests.");
        return Ok(());
    }
    println!("{:<38} {:<38} {:<6} {}", "ID", "DOWNLOAD", "ERRORS", "URL");
    for r in requests {
        println!(
            "{:<38} {:<38} {:<6} {}",
            r.id,
            r.download_id.as_deref().unwrap_or("-"),
            r.errors.len(),
            r.url
        );
    }
    Ok(())
}
