use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DownloadError;
use super::metadata::Metadata;
use super::request::{Request, ResourceKey};
use crate::checksum::ChecksumKind;

/// Transfer progress as seen by the reconciliation loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub bytes_read: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Progress event emitted by a worker's status writer. `bytes_read` is the
/// delta since the previous update for the same download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub download_id: String,
    pub bytes_read: u64,
    pub checksum: String,
    pub time: DateTime<Utc>,
    pub finished: bool,
}

/// One fetch of one resource, from queueing to a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Download {
    pub id: String,
    pub url: String,
    pub checksum_type: ChecksumKind,
    /// Running hex digest; final once `finished` is set.
    #[serde(default)]
    pub checksum: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    #[serde(default)]
    pub status: Status,
    pub time_requested: DateTime<Utc>,
    /// `None` while the download is waiting for a worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished: bool,
    /// Set when the transfer was abandoned; cleared when it is queued again.
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub errors: Vec<DownloadError>,
}

impl Download {
    /// New waiting download for `request`. An unsupported checksum type is
    /// replaced by the default digest and the substitution recorded as an
    /// error on the download.
    pub fn new(id: impl Into<String>, request: &Request, now: DateTime<Utc>) -> Self {
        let id = id.into();
        let (checksum_type, note) = ChecksumKind::resolve(request.checksum_type.as_deref());
        let mut errors = Vec::new();
        if let Some(note) = note {
            errors.push(DownloadError::new(id.clone(), note, now));
        }
        Self {
            id,
            url: request.url.clone(),
            checksum_type,
            checksum: String::new(),
            expected_checksum: request.checksum.clone(),
            metadata: request.metadata.clone(),
            status: Status::default(),
            time_requested: now,
            time_started: None,
            finished: false,
            failed: false,
            errors,
        }
    }

    /// Key this download answers to. Metadata never changes after creation,
    /// so neither does the key.
    pub fn resource_key(&self) -> ResourceKey {
        let etag = self
            .metadata
            .as_ref()
            .map(|m| m.etag_or_empty())
            .unwrap_or("");
        ResourceKey::new(self.url.clone(), etag)
    }

    pub fn is_waiting(&self) -> bool {
        !self.finished && self.time_started.is_none()
    }

    pub fn is_in_progress(&self) -> bool {
        !self.finished && self.time_started.is_some()
    }

    /// Fold a status update into this download. Returns `true` only on the
    /// transition to finished. Updates arriving after that are ignored.
    pub fn apply_status_update(&mut self, update: &StatusUpdate) -> bool {
        if self.finished {
            return false;
        }
        if self.time_started.is_none() {
            self.time_started = Some(update.time);
        }
        self.status.bytes_read = self.status.bytes_read.saturating_add(update.bytes_read);
        self.status.updated_at = Some(update.time);
        if !update.checksum.is_empty() {
            self.checksum = update.checksum.clone();
        }
        if !update.finished {
            return false;
        }
        self.finished = true;
        if let Some(expected) = self.expected_checksum.as_deref() {
            if !expected.eq_ignore_ascii_case(&self.checksum) {
                let msg = format!(
                    "checksum mismatch: expected {} {}, computed {}",
                    self.checksum_type, expected, self.checksum
                );
                self.errors.push(DownloadError::new(self.id.clone(), msg, update.time));
            }
        }
        true
    }

    pub fn add_error(&mut self, error: DownloadError) {
        self.errors.push(error);
    }

    /// Record a transfer error. The download stays unfinished.
    pub fn mark_failed(&mut self, error: DownloadError) {
        if !self.finished {
            self.failed = true;
        }
        self.errors.push(error);
    }

    /// Put a failed download back in the waiting state so it can be fetched
    /// again from byte zero. Errors from earlier attempts are kept.
    pub fn reset_for_retry(&mut self) {
        self.checksum.clear();
        self.status = Status::default();
        self.time_started = None;
        self.failed = false;
    }

    /// Time spent transferring so far (zero before the first update).
    pub fn duration(&self) -> Duration {
        match (self.time_started, self.status.updated_at) {
            (Some(started), Some(updated)) if updated > started => updated - started,
            _ => Duration::zero(),
        }
    }

    /// Percentage of the declared size read so far; `None` when the size is
    /// unknown.
    pub fn percent_complete(&self) -> Option<f64> {
        let size = self.metadata.as_ref().and_then(|m| m.size).filter(|s| *s > 0)?;
        Some(100.0 * self.status.bytes_read as f64 / size as f64)
    }

    pub fn average_bytes_per_second(&self) -> Option<f64> {
        let millis = self.duration().num_milliseconds();
        if millis <= 0 {
            return None;
        }
        Some(self.status.bytes_read as f64 * 1000.0 / millis as f64)
    }
}
