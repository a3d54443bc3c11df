//! CLI command handlers, one file per concern.

mod checksum;
mod fetch;
mod list;
mod remove;
mod stats;

use anyhow::{Context, Result};
use fetchd_core::model::Download;
use fetchd_core::Services;

pub use checksum::{run_checksum, run_verify};
pub use fetch::{run_fetch, FetchOptions};
pub use list::{run_list, run_requests, run_show};
pub use remove::run_remove;
pub use stats::run_stats;

/// Look up a download or fail with a readable message.
async fn require_download(services: &Services, id: &str) -> Result<Download> {
    services
        .downloads
        .find_by_id(id)
        .await?
        .with_context(|| format!("no download with id {id}"))
}
