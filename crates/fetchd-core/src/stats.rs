//! Aggregate timing and size statistics over a set of downloads.
//!
//! Times are reported in milliseconds, sizes in bytes.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::Download;

/// Running count/sum/min/max/mean of a series of samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RunningStat {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl RunningStat {
    pub fn update(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
    }

    /// Zero when there are no samples.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum / self.count as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DownloadStats {
    /// Queue time: start minus request, or now minus request while waiting.
    pub wait_time_ms: RunningStat,
    /// Transfer time: last update minus start; zero before the start.
    pub download_time_ms: RunningStat,
    pub bytes_read: RunningStat,
}

impl DownloadStats {
    pub fn add(&mut self, d: &Download, now: DateTime<Utc>) {
        let wait = match d.time_started {
            Some(started) => started - d.time_requested,
            None => now - d.time_requested,
        };
        self.wait_time_ms.update(wait.num_milliseconds() as f64);
        self.download_time_ms
            .update(d.duration().num_milliseconds() as f64);
        self.bytes_read.update(d.status.bytes_read as f64);
    }

    pub fn from_downloads<'a>(
        downloads: impl IntoIterator<Item = &'a Download>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut stats = Self::default();
        for d in downloads {
            stats.add(d, now);
        }
        stats
    }
}
