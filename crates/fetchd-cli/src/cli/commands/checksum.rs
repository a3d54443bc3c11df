//! `fetchd verify <id>` and `fetchd checksum <id>` – check a stored payload.

use anyhow::Result;
use fetchd_core::Services;

use super::require_download;

pub async fn run_verify(services: &Services, id: &str) -> Result<()> {
    let download = require_download(services, id).await?;
    if services.downloads.verify(&download).await? {
        println!("{id}: ok");
        Ok(())
    } else {
        anyhow::bail!("{id}: stored payload does not have the expected size")
    }
}

pub async fn run_checksum(services: &Services, id: &str) -> Result<()> {
    let download = require_download(services, id).await?;
    let report = services.downloads.recompute_checksum(&download).await?;
    println!("{}  {} ({})", report.computed, id, report.kind);
    if !report.matches() {
        anyhow::bail!("{id}: recorded {} checksum is {:?}", report.kind, report.recorded);
    }
    Ok(())
}
