//! `fetchd remove <id>` – delete the payload, then the record.

use anyhow::Result;
use fetchd_core::Services;

pub async fn run_remove(services: &Services, id: &str) -> Result<()> {
    if services.downloads.delete_by_id(id).await? {
        println!("Removed download {id}");
    } else {
        println!("No download with id {id}");
    }
    Ok(())
}
