use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::status_writer::DEFAULT_UPDATE_THRESHOLD;

/// libcurl limits (optional `[http]` section in config.toml).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    /// Whole-request timeout for HEAD probes.
    pub probe_timeout_secs: u64,
    /// A GET slower than this many bytes/s for `low_speed_time_secs` is aborted.
    pub low_speed_limit_bytes: u32,
    pub low_speed_time_secs: u64,
    /// Whole-request timeout for a webhook POST.
    pub webhook_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 15,
            probe_timeout_secs: 30,
            low_speed_limit_bytes: 1024,
            low_speed_time_secs: 60,
            webhook_timeout_secs: 30,
        }
    }
}

/// Record store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Json,
    Sqlite,
}

/// Global configuration loaded from `~/.config/fetchd/config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchdConfig {
    /// Number of concurrent fetch workers.
    pub worker_count: usize,
    /// Capacity of the job queue; submissions block while it is full.
    pub queue_length: usize,
    /// Bytes between intermediate progress updates.
    pub update_byte_threshold: u64,
    pub store: StoreBackend,
    /// Record store location (default: `$XDG_DATA_HOME/fetchd`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// Payload location (default: `<data_dir>/blobs`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_dir: Option<PathBuf>,
    pub http: HttpConfig,
}

impl Default for FetchdConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            queue_length: 32,
            update_byte_threshold: DEFAULT_UPDATE_THRESHOLD,
            store: StoreBackend::Json,
            data_dir: None,
            blob_dir: None,
            http: HttpConfig::default(),
        }
    }
}

impl FetchdConfig {
    /// Config rooted at `dir`: records in `dir`, payloads in `dir/blobs`.
    pub fn with_data_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(dir.into()),
            ..Self::default()
        }
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => {
                let xdg_dirs = xdg::BaseDirectories::with_prefix("fetchd")?;
                Ok(xdg_dirs.get_data_home())
            }
        }
    }

    pub fn blob_dir(&self) -> Result<PathBuf> {
        match &self.blob_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(self.data_dir()?.join("blobs")),
        }
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            anyhow::bail!("worker_count must be at least 1");
        }
        if self.queue_length == 0 {
            anyhow::bail!("queue_length must be at least 1");
        }
        Ok(())
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("fetchd")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<FetchdConfig> {
    load_or_init_at(&config_path()?)
}

/// Same as [`load_or_init`] for an explicit path.
pub fn load_or_init_at(path: &Path) -> Result<FetchdConfig> {
    if !path.exists() {
        let default_cfg = FetchdConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(path)?;
    let cfg: FetchdConfig =
        toml::from_str(&data).with_context(|| format!("invalid config {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}
