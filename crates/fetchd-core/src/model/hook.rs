use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Webhook registration for one request's interest in one download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hook {
    pub id: String,
    pub download_id: String,
    pub request_id: String,
    pub url: String,
    /// `None` until a delivery attempt has been made.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<HookResult>,
}

impl Hook {
    pub fn is_pending(&self) -> bool {
        self.result.is_none()
    }
}

/// Outcome of the single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookResult {
    #[serde(default)]
    pub errors: Vec<String>,
    /// Absent when the POST never got a response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u32>,
    pub time: DateTime<Utc>,
}

impl HookResult {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && self.status_code == Some(200)
    }
}
