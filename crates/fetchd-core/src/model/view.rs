//! Public JSON shape of a download, posted to webhooks and printed by the CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::download::Download;
use super::metadata::Metadata;
use crate::checksum::ChecksumKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadView {
    pub id: String,
    pub url: String,
    pub checksum: String,
    pub checksum_type: ChecksumKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    pub bytes_read: u64,
    pub time_requested: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_started: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_updated: Option<DateTime<Utc>>,
    pub finished: bool,
    #[serde(default)]
    pub failed: bool,
    pub duration_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent_complete: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_bytes_per_second: Option<f64>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl DownloadView {
    pub fn from_download(d: &Download) -> Self {
        Self {
            id: d.id.clone(),
            url: d.url.clone(),
            checksum: d.checksum.clone(),
            checksum_type: d.checksum_type,
            metadata: d.metadata.clone(),
            bytes_read: d.status.bytes_read,
            time_requested: d.time_requested,
            time_started: d.time_started,
            time_updated: d.status.updated_at,
            finished: d.finished,
            failed: d.failed,
            duration_ms: d.duration().num_milliseconds(),
            percent_complete: d.percent_complete(),
            avg_bytes_per_second: d.average_bytes_per_second(),
            errors: d.errors.iter().map(|e| e.message.clone()).collect(),
        }
    }
}

impl From<&Download> for DownloadView {
    fn from(d: &Download) -> Self {
        Self::from_download(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IncomingRequest, Request, StatusUpdate};
    use chrono::{Duration, TimeZone};

    #[test]
    fn view_json_carries_progress_fields() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let req = Request::from_incoming(IncomingRequest::new("http://x/file.bin"), t0);
        let mut d = Download::new("d1", &req, t0);
        d.apply_status_update(&StatusUpdate {
            download_id: "d1".into(),
            bytes_read: 0,
            checksum: String::new(),
            time: t0,
            finished: false,
        });
        d.apply_status_update(&StatusUpdate {
            download_id: "d1".into(),
            bytes_read: 4000,
            checksum: "abc".into(),
            time: t0 + Duration::seconds(2),
            finished: true,
        });

        let json = serde_json::to_value(DownloadView::from(&d)).unwrap();
        assert_eq!(json["id"], "d1");
        assert_eq!(json["checksum_type"], "sha256");
        assert_eq!(json["bytes_read"], 4000);
        assert_eq!(json["finished"], true);
        assert_eq!(json["duration_ms"], 2000);
        assert_eq!(json["avg_bytes_per_second"], 2000.0);
        assert!(json.get("percent_complete").is_none());
    }
}
