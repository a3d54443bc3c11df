//! Notifications published by the reconciliation loop.

use crate::model::Download;

/// Terminal transitions of a download, as stored.
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    Finished(Download),
    Failed(Download),
}

impl DownloadEvent {
    pub fn download(&self) -> &Download {
        match self {
            DownloadEvent::Finished(d) | DownloadEvent::Failed(d) => d,
        }
    }
}
