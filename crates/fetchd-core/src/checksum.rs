//! Checksum algorithms for downloaded payloads.
//!
//! A [`RunningChecksum`] is fed inline with the transfer (through the status
//! writer); [`digest_reader`] re-hashes a stored payload after the fact.

use anyhow::{Context, Result};
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::io::Read;

const BUF_SIZE: usize = 64 * 1024;

/// Digest used when a request names none or names one we do not support.
pub const DEFAULT_CHECKSUM: ChecksumKind = ChecksumKind::Sha256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumKind {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl ChecksumKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChecksumKind::Md5 => "md5",
            ChecksumKind::Sha1 => "sha1",
            ChecksumKind::Sha256 => "sha256",
            ChecksumKind::Sha512 => "sha512",
        }
    }

    /// Case-insensitive lookup; `None` for anything outside the supported set.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "md5" => Some(ChecksumKind::Md5),
            "sha1" => Some(ChecksumKind::Sha1),
            "sha256" => Some(ChecksumKind::Sha256),
            "sha512" => Some(ChecksumKind::Sha512),
            _ => None,
        }
    }

    /// Resolve a requested checksum type. Unknown names fall back to
    /// [`DEFAULT_CHECKSUM`] and return a note explaining the substitution.
    pub fn resolve(requested: Option<&str>) -> (Self, Option<String>) {
        match requested.map(str::trim).filter(|s| !s.is_empty()) {
            None => (DEFAULT_CHECKSUM, None),
            Some(name) => match Self::parse(name) {
                Some(kind) => (kind, None),
                None => (
                    DEFAULT_CHECKSUM,
                    Some(format!(
                        "no checksum algorithm named {:?}, defaulting to {}",
                        name,
                        DEFAULT_CHECKSUM.as_str()
                    )),
                ),
            },
        }
    }

    pub fn hasher(self) -> RunningChecksum {
        match self {
            ChecksumKind::Md5 => RunningChecksum::Md5(Md5::new()),
            ChecksumKind::Sha1 => RunningChecksum::Sha1(Sha1::new()),
            ChecksumKind::Sha256 => RunningChecksum::Sha256(Sha256::new()),
            ChecksumKind::Sha512 => RunningChecksum::Sha512(Sha512::new()),
        }
    }
}

impl Default for ChecksumKind {
    fn default() -> Self {
        DEFAULT_CHECKSUM
    }
}

impl fmt::Display for ChecksumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Incremental hasher whose digest can be read at any point without
/// disturbing the running state.
#[derive(Clone)]
pub enum RunningChecksum {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha512(Sha512),
}

impl RunningChecksum {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            RunningChecksum::Md5(h) => h.update(data),
            RunningChecksum::Sha1(h) => h.update(data),
            RunningChecksum::Sha256(h) => h.update(data),
            RunningChecksum::Sha512(h) => h.update(data),
        }
    }

    /// Lowercase hex digest of everything fed so far.
    pub fn hex_digest(&self) -> String {
        match self {
            RunningChecksum::Md5(h) => hex::encode(h.clone().finalize()),
            RunningChecksum::Sha1(h) => hex::encode(h.clone().finalize()),
            RunningChecksum::Sha256(h) => hex::encode(h.clone().finalize()),
            RunningChecksum::Sha512(h) => hex::encode(h.clone().finalize()),
        }
    }
}

impl fmt::Debug for RunningChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            RunningChecksum::Md5(_) => ChecksumKind::Md5,
            RunningChecksum::Sha1(_) => ChecksumKind::Sha1,
            RunningChecksum::Sha256(_) => ChecksumKind::Sha256,
            RunningChecksum::Sha512(_) => ChecksumKind::Sha512,
        };
        f.debug_tuple("RunningChecksum").field(&kind).finish()
    }
}

/// Hash a whole stream in bounded chunks and return the lowercase hex digest.
pub fn digest_reader(kind: ChecksumKind, reader: &mut dyn Read) -> Result<String> {
    let mut hasher = kind.hasher();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = reader.read(&mut buf).context("read payload for checksum")?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.hex_digest())
}
