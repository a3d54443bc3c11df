use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::RequestError;
use super::metadata::Metadata;

/// Deduplication identity of a fetchable resource.
///
/// The ETag is the empty string when the server did not send one; that is a
/// key value of its own, distinct from any real ETag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub url: String,
    pub etag: String,
}

impl ResourceKey {
    pub fn new(url: impl Into<String>, etag: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            etag: etag.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.etag.is_empty() {
            write!(f, "{}", self.url)
        } else {
            write!(f, "{} (etag {})", self.url, self.etag)
        }
    }
}

/// Submission rejected before any resource is created.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("empty url")]
    EmptyUrl,
    #[error("invalid {field}: {reason}")]
    InvalidUrl { field: &'static str, reason: String },
    #[error("unsupported {field} scheme {scheme:?} (expected http or https)")]
    UnsupportedScheme { field: &'static str, scheme: String },
}

/// Public submission shape: `{url, checksum?, checksum_type?, callback?}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingRequest {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<String>,
}

impl IncomingRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.url.trim().is_empty() {
            return Err(ValidationError::EmptyUrl);
        }
        check_http_url("url", self.url.trim())?;
        if let Some(callback) = self.callback.as_deref().filter(|c| !c.trim().is_empty()) {
            check_http_url("callback", callback.trim())?;
        }
        Ok(())
    }
}

fn check_http_url(field: &'static str, raw: &str) -> Result<(), ValidationError> {
    let parsed = url::Url::parse(raw).map_err(|e| ValidationError::InvalidUrl {
        field,
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ValidationError::UnsupportedScheme {
            field,
            scheme: other.to_string(),
        }),
    }
}

/// A client's ask to fetch a URL, kept for auditing whether or not it led to
/// a download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<String>,
    pub time_requested: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    #[serde(default)]
    pub errors: Vec<RequestError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_id: Option<String>,
}

impl Request {
    /// Build an unsaved request; the request service assigns id and time.
    pub fn from_incoming(incoming: IncomingRequest, time_requested: DateTime<Utc>) -> Self {
        let non_empty = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        Self {
            id: String::new(),
            url: incoming.url.trim().to_string(),
            checksum: non_empty(incoming.checksum),
            checksum_type: non_empty(incoming.checksum_type),
            callback: non_empty(incoming.callback),
            time_requested,
            metadata: None,
            errors: Vec::new(),
            download_id: None,
        }
    }

    pub fn resource_key(&self) -> ResourceKey {
        let etag = self
            .metadata
            .as_ref()
            .map(|m| m.etag_or_empty())
            .unwrap_or("");
        ResourceKey::new(self.url.clone(), etag)
    }

    pub fn add_error(&mut self, err: impl fmt::Display, time: DateTime<Utc>) {
        self.errors.push(RequestError::new(err, time));
    }
}
