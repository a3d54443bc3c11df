//! Blob store on the local filesystem: `<root>/<download-id>/<file name>`.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use super::{blob_file_name, expected_size, BlobStore, BlobWriter, TEMP_SUFFIX};
use crate::model::Download;

#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Store rooted at `root`; the directory is created if missing.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create blob dir: {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir_for(&self, download: &Download) -> PathBuf {
        self.root.join(&download.id)
    }

    /// Final location of a download's payload.
    pub fn path_for(&self, download: &Download) -> PathBuf {
        self.dir_for(download).join(blob_file_name(&download.url))
    }
}

fn temp_path(final_path: &Path) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(TEMP_SUFFIX);
    PathBuf::from(o)
}

impl BlobStore for LocalBlobStore {
    fn writer(&self, download: &Download) -> Result<Box<dyn BlobWriter>> {
        let dir = self.dir_for(download);
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let final_path = self.path_for(download);
        let temp_path = temp_path(&final_path);
        let file = File::options()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .with_context(|| format!("failed to create temp file: {}", temp_path.display()))?;
        Ok(Box::new(LocalBlobWriter {
            file: Some(BufWriter::new(file)),
            temp_path,
            final_path,
        }))
    }

    fn reader(&self, download: &Download) -> Result<Box<dyn Read + Send>> {
        let path = self.path_for(download);
        let file = File::open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Box::new(file))
    }

    fn delete(&self, download: &Download) -> Result<bool> {
        let path = self.path_for(download);
        let removed = match fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                return Err(e).with_context(|| format!("failed to remove {}", path.display()))
            }
        };
        // Best effort: the directory only ever holds this one payload.
        let _ = fs::remove_dir(self.dir_for(download));
        Ok(removed)
    }

    fn verify(&self, download: &Download) -> Result<bool> {
        let path = self.path_for(download);
        let actual = match fs::metadata(&path) {
            Ok(m) => m.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e).with_context(|| format!("failed to stat {}", path.display())),
        };
        let expected = expected_size(download);
        if actual != expected {
            tracing::debug!(download_id = %download.id, actual, expected, "blob size mismatch");
        }
        Ok(actual == expected)
    }
}

/// Writer for a `.part` file. Renamed into place on commit, removed on drop
/// otherwise.
struct LocalBlobWriter {
    file: Option<BufWriter<File>>,
    temp_path: PathBuf,
    final_path: PathBuf,
}

impl Write for LocalBlobWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(f) => f.write(buf),
            None => Err(io::Error::new(io::ErrorKind::Other, "blob writer already committed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(f) => f.flush(),
            None => Ok(()),
        }
    }
}

impl BlobWriter for LocalBlobWriter {
    fn commit(mut self: Box<Self>) -> Result<()> {
        if let Some(buf) = self.file.take() {
            let file = buf
                .into_inner()
                .map_err(|e| e.into_error())
                .context("failed to flush blob")?;
            file.sync_all().context("blob sync failed")?;
        }
        if let Err(e) = fs::rename(&self.temp_path, &self.final_path) {
            let _ = fs::remove_file(&self.temp_path);
            return Err(e).with_context(|| {
                format!(
                    "failed to rename {} to {}",
                    self.temp_path.display(),
                    self.final_path.display()
                )
            });
        }
        Ok(())
    }
}

impl Drop for LocalBlobWriter {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            let _ = fs::remove_file(&self.temp_path);
        }
    }
}
