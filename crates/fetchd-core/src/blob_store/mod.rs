//! Payload storage.
//!
//! A [`BlobStore`] owns the bytes of each download. Writers stage data in a
//! `.part` file and only expose it on [`BlobWriter::commit`]; a writer dropped
//! without committing removes its staging file.

mod local;
mod naming;

use anyhow::Result;
use std::io::{Read, Write};

use crate::model::Download;

pub use local::LocalBlobStore;
pub use naming::{blob_file_name, sanitize_file_name};

/// Temporary file suffix used before atomic rename.
pub const TEMP_SUFFIX: &str = ".part";

/// Staged payload being written by a worker.
pub trait BlobWriter: Write + Send {
    /// Make the payload visible under its final name. Consumes the writer.
    fn commit(self: Box<Self>) -> Result<()>;
}

pub trait BlobStore: Send + Sync {
    fn writer(&self, download: &Download) -> Result<Box<dyn BlobWriter>>;

    fn reader(&self, download: &Download) -> Result<Box<dyn Read + Send>>;

    /// Remove the stored payload. `Ok(false)` when there was nothing to remove.
    fn delete(&self, download: &Download) -> Result<bool>;

    /// Whether the stored payload has the size the download expects: the
    /// declared size when known, else the number of bytes read.
    fn verify(&self, download: &Download) -> Result<bool>;
}

/// Size a stored payload should have.
pub(crate) fn expected_size(download: &Download) -> u64 {
    download
        .metadata
        .as_ref()
        .and_then(|m| m.size)
        .unwrap_or(download.status.bytes_read)
}
