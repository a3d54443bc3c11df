//! `fetchd fetch <url>...` – submit requests and wait for their downloads.

use anyhow::Result;
use fetchd_core::model::IncomingRequest;
use fetchd_core::service::DownloadEvent;
use fetchd_core::Services;
use std::collections::HashSet;
use tokio::sync::broadcast::error::RecvError;

/// Options shared by every URL of one `fetch` invocation.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub checksum_type: Option<String>,
    pub checksum: Option<String>,
    pub callback: Option<String>,
}

pub async fn run_fetch(services: &Services, urls: &[String], opts: &FetchOptions) -> Result<()> {
    // Subscribe before submitting so no terminal event is missed.
    let mut events = services.downloads.subscribe();
    let mut pending: HashSet<String> = HashSet::new();

    for url in urls {
        let incoming = IncomingRequest {
            url: url.clone(),
            checksum: opts.checksum.clone(),
            checksum_type: opts.checksum_type.clone(),
            callback: opts.callback.clone(),
        };
        let request = services.requests.submit(incoming).await?;
        for err in &request.errors {
            eprintln!("request {}: {}", request.id, err.message);
        }
        let Some(download_id) = request.download_id else {
            continue;
        };
        println!("request {} -> download {}", request.id, download_id);
        let already_finished = services
            .downloads
            .find_by_id(&download_id)
            .await?
            .is_some_and(|d| d.finished);
        if already_finished {
            println!("download {} already finished", download_id);
        } else {
            pending.insert(download_id);
        }
    }

    let mut failures = 0usize;
    while !pending.is_empty() {
        match events.recv().await {
            Ok(event) => {
                let d = event.download();
                if !pending.remove(&d.id) {
                    continue;
                }
                match &event {
                    DownloadEvent::Finished(d) => {
                        println!("finished {} ({} bytes, {} {})", d.id, d.status.bytes_read, d.checksum_type, d.checksum);
                        for err in &d.errors {
                            eprintln!("download {}: {}", d.id, err.message);
                        }
                    }
                    DownloadEvent::Failed(d) => {
                        failures += 1;
                        let reason = d.errors.last().map(|e| e.message.as_str()).unwrap_or("unknown error");
                        eprintln!("failed {}: {}", d.id, reason);
                    }
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "missed download events; re-reading records");
                let mut settled = Vec::new();
                for id in &pending {
                    match services.downloads.find_by_id(id).await? {
                        Some(d) if d.failed => {
                            failures += 1;
                            settled.push(id.clone());
                        }
                        Some(d) if !d.finished => {}
                        _ => settled.push(id.clone()),
                    }
                }
                for id in settled {
                    pending.remove(&id);
                }
            }
            Err(RecvError::Closed) => anyhow::bail!("download service stopped"),
        }
    }

    services.hooks.drain().await;
    if failures > 0 {
        anyhow::bail!("{failures} download(s) failed");
    }
    Ok(())
}
