use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Descriptive attributes of a remote resource, taken from a HEAD probe.
///
/// Header values that fail to parse are kept out of the typed fields and
/// described in `errors`; they never fail the probe itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub time_requested: DateTime<Utc>,
    pub status_code: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl Metadata {
    pub fn new(status_code: u32, time_requested: DateTime<Utc>) -> Self {
        Self {
            time_requested,
            status_code,
            mime_type: None,
            size: None,
            etag: None,
            last_modified: None,
            expires: None,
            server: None,
            errors: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status_code == 200
    }

    /// ETag as used in a resource key: empty when the server sent none.
    pub fn etag_or_empty(&self) -> &str {
        self.etag.as_deref().unwrap_or("")
    }
}
