//! HTTP HEAD probing.
//!
//! Uses the curl crate (libcurl) to fetch response headers and turn them into
//! [`Metadata`]. Non-2xx answers are returned as metadata, not errors; the
//! request service decides what a status code means.

mod parse;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::str;
use std::time::Duration;

use crate::config::HttpConfig;
use crate::model::Metadata;

pub(crate) use parse::parse_headers;

/// Performs a HEAD request and returns the parsed metadata of the final
/// response (redirects are followed).
///
/// Runs in the current thread; call from `spawn_blocking` if used from async code.
pub fn probe(url: &str, http: &HttpConfig, now: DateTime<Utc>) -> Result<Metadata> {
    let mut headers: Vec<String> = Vec::new();

    let mut easy = curl::easy::Easy::new();
    easy.url(url).context("invalid URL")?;
    easy.nobody(true)?; // HEAD request
    easy.follow_location(true)?;
    easy.connect_timeout(Duration::from_secs(http.connect_timeout_secs))?;
    easy.timeout(Duration::from_secs(http.probe_timeout_secs))?;

    {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            if let Ok(s) = str::from_utf8(data) {
                headers.push(s.trim_end().to_string());
            }
            true
        })?;
        transfer
            .perform()
            .with_context(|| format!("HEAD {} failed", url))?;
    }

    let code = easy.response_code().context("no response code")?;
    tracing::debug!(url, status = code, "HEAD probe");
    Ok(parse_headers(&headers, code, now))
}

/// Source of resource metadata for the request service.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn head(&self, url: &str, now: DateTime<Utc>) -> Result<Metadata>;
}

/// libcurl HEAD probe, run on the blocking pool.
#[derive(Debug, Clone, Default)]
pub struct CurlProber {
    http: HttpConfig,
}

impl CurlProber {
    pub fn new(http: HttpConfig) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Prober for CurlProber {
    async fn head(&self, url: &str, now: DateTime<Utc>) -> Result<Metadata> {
        let url = url.to_string();
        let http = self.http.clone();
        tokio::task::spawn_blocking(move || probe(&url, &http, now))
            .await
            .context("HEAD probe task panicked")?
    }
}
