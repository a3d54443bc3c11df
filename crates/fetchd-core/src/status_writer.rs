//! Progress and checksum instrumentation for a streaming transfer.
//!
//! The worker tees every body chunk into a [`StatusWriter`]. It hashes the
//! bytes and emits a [`StatusUpdate`] whenever more than `threshold` bytes
//! have arrived since the previous one. [`StatusWriter::close`] always emits a
//! final update with whatever delta is left.

use anyhow::{anyhow, Result};
use std::io::{self, Write};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

use crate::checksum::{ChecksumKind, RunningChecksum};
use crate::clock::Clock;
use crate::model::StatusUpdate;

/// Default number of bytes between intermediate updates.
pub const DEFAULT_UPDATE_THRESHOLD: u64 = 50_000;

/// Destination for status updates. Must not block the caller.
pub trait StatusSender: Send + Sync {
    fn send(&self, update: StatusUpdate) -> Result<()>;
}

/// Sender backed by the service's unbounded status channel.
#[derive(Clone)]
pub struct ChannelStatusSender {
    tx: UnboundedSender<StatusUpdate>,
}

impl ChannelStatusSender {
    pub fn new(tx: UnboundedSender<StatusUpdate>) -> Self {
        Self { tx }
    }
}

impl StatusSender for ChannelStatusSender {
    fn send(&self, update: StatusUpdate) -> Result<()> {
        self.tx
            .send(update)
            .map_err(|_| anyhow!("status channel closed"))
    }
}

pub struct StatusWriter {
    download_id: String,
    hasher: RunningChecksum,
    threshold: u64,
    since_last: u64,
    sender: Arc<dyn StatusSender>,
    clock: Arc<dyn Clock>,
}

impl StatusWriter {
    pub fn new(
        download_id: impl Into<String>,
        kind: ChecksumKind,
        threshold: u64,
        sender: Arc<dyn StatusSender>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            download_id: download_id.into(),
            hasher: kind.hasher(),
            threshold,
            since_last: 0,
            sender,
            clock,
        }
    }

    /// Zero-byte update marking the transfer as started.
    pub fn send_start_update(&self) -> Result<()> {
        self.sender.send(self.update(0, false))
    }

    /// Emit the final update (remaining delta, `finished = true`).
    pub fn close(mut self) -> Result<()> {
        let delta = std::mem::take(&mut self.since_last);
        self.sender.send(self.update(delta, true))
    }

    pub fn checksum(&self) -> String {
        self.hasher.hex_digest()
    }

    fn update(&self, bytes_read: u64, finished: bool) -> StatusUpdate {
        StatusUpdate {
            download_id: self.download_id.clone(),
            bytes_read,
            checksum: self.hasher.hex_digest(),
            time: self.clock.now(),
            finished,
        }
    }
}

impl Write for StatusWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hasher.update(buf);
        self.since_last += buf.len() as u64;
        if self.since_last > self.threshold {
            let delta = std::mem::take(&mut self.since_last);
            self.sender
                .send(self.update(delta, false))
                .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e.to_string()))?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
