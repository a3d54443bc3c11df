//! CLI for the fetchd download orchestrator.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use fetchd_core::config;
use fetchd_core::store::{DownloadFilter, Page, DEFAULT_PAGE_LIMIT};
use fetchd_core::Services;

use commands::{
    run_checksum, run_fetch, run_list, run_remove, run_requests, run_show, run_stats, run_verify,
    FetchOptions,
};

/// Top-level CLI for fetchd.
#[derive(Debug, Parser)]
#[command(name = "fetchd")]
#[command(about = "fetchd: deduplicated downloads with webhook callbacks", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Submit URLs and wait until their downloads finish or fail.
    Fetch {
        /// Direct HTTP/HTTPS URLs to download.
        #[arg(required = true, num_args = 1..)]
        urls: Vec<String>,
        /// Digest to compute while downloading (md5, sha1, sha256, sha512).
        #[arg(long, value_name = "TYPE")]
        checksum_type: Option<String>,
        /// Expected digest, compared once the download finishes.
        #[arg(long)]
        checksum: Option<String>,
        /// URL to POST the finished download to.
        #[arg(long, value_name = "URL")]
        callback: Option<String>,
    },

    /// List downloads.
    List {
        /// all, finished, not-finished, in-progress or waiting.
        #[arg(long, default_value = "all")]
        filter: DownloadFilter,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT)]
        limit: usize,
    },

    /// Show one download as JSON.
    Show {
        /// Download identifier.
        id: String,
    },

    /// List submitted requests.
    Requests {
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT)]
        limit: usize,
    },

    /// Remove a download record and its payload.
    Remove {
        /// Download identifier.
        id: String,
    },

    /// Check that a stored payload has the expected size.
    Verify {
        /// Download identifier.
        id: String,
    },

    /// Re-hash a stored payload and compare with the recorded checksum.
    Checksum {
        /// Download identifier.
        id: String,
    },

    /// Wait, transfer time and size statistics over all downloads.
    Stats,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);
        let services = Services::open(&cfg).await?;

        let result = cli.command.dispatch(&services).await;
        services.shutdown().await;
        result
    }

    async fn dispatch(self, services: &Services) -> Result<()> {
        match self {
            CliCommand::Fetch {
                urls,
                checksum_type,
                checksum,
                callback,
            } => {
                let opts = FetchOptions {
                    checksum_type,
                    checksum,
                    callback,
                };
                run_fetch(services, &urls, &opts).await
            }
            CliCommand::List {
                filter,
                offset,
                limit,
            } => run_list(services, filter, Page::new(offset, limit)).await,
            CliCommand::Show { id } => run_show(services, &id).await,
            CliCommand::Requests { offset, limit } => {
                run_requests(services, Page::new(offset, limit)).await
            }
            CliCommand::Remove { id } => run_remove(services, &id).await,
            CliCommand::Verify { id } => run_verify(services, &id).await,
            CliCommand::Checksum { id } => run_checksum(services, &id).await,
            CliCommand::Stats => run_stats(services).await,
        }
    }
}

#[cfg(test)]
mod tests;
