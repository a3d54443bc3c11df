//! Timestamped failure records attached to requests and downloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestError {
    pub time: DateTime<Utc>,
    pub message: String,
}

impl RequestError {
    pub fn new(message: impl fmt::Display, time: DateTime<Utc>) -> Self {
        Self {
            time,
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadError {
    pub download_id: String,
    pub time: DateTime<Utc>,
    pub message: String,
}

impl DownloadError {
    pub fn new(download_id: impl Into<String>, message: impl fmt::Display, time: DateTime<Utc>) -> Self {
        Self {
            download_id: download_id.into(),
            time,
            message: message.to_string(),
        }
    }
}

impl fmt::Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "download {}: {}", self.download_id, self.message)
    }
}
