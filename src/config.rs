//! Configuration for file-storage

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::db::Tables;
use crate::error::{Result, StorageError};
use crate::placement::{Placement, DEFAULT_DEPTH};

/// Default catalog database path
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("file-storage")
        .join("catalog.db")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// SQLite catalog shared by every bucket
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default)]
    pub buckets: Vec<BucketConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            buckets: Vec::new(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> std::result::Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> std::result::Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    pub fn bucket(&self, name: &str) -> Option<&BucketConfig> {
        self.buckets.iter().find(|b| b.name == name)
    }
}

/// One bucket: a set of machines holding files under `dir`, catalogued in
/// a pair of tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketConfig {
    pub name: String,

    /// Machines storing a replica. Entries naming this host are written
    /// locally, the rest over scp.
    pub machines: Vec<String>,

    /// Absolute storage root, the same path on every machine
    pub dir: PathBuf,

    /// Shard levels below `dir`. Unset means 3; 0 stores files flat.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir_depth: Option<u8>,

    /// User for ssh/scp to remote machines
    #[serde(default)]
    pub scp_user: String,

    #[serde(default)]
    pub download_url_prefix: String,

    /// Path prefix for the `X-Accel-Redirect` header. Empty means files are
    /// streamed directly.
    #[serde(default)]
    pub redirect_path_prefix: String,

    #[serde(default = "default_files_table")]
    pub files_table: String,

    #[serde(default = "default_links_table")]
    pub links_table: String,

    /// Check every node for already catalogued files on save and rewrite
    /// missing copies
    #[serde(default = "default_true")]
    pub verify_existing: bool,

    /// Seconds between garbage collection cycles (0 = no collector)
    #[serde(default = "default_clean_interval")]
    pub clean_interval_secs: u64,

    /// Minimum age in seconds of an unlinked file before it is collected
    /// (0 = no collector)
    #[serde(default = "default_clean_after")]
    pub clean_after_secs: u64,
}

fn default_files_table() -> String {
    "files".to_string()
}

fn default_links_table() -> String {
    "file_links".to_string()
}

fn default_true() -> bool {
    true
}

fn default_clean_interval() -> u64 {
    3600
}

fn default_clean_after() -> u64 {
    86400
}

impl BucketConfig {
    pub fn new(name: impl Into<String>, machines: Vec<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            machines,
            dir: dir.into(),
            dir_depth: None,
            scp_user: String::new(),
            download_url_prefix: String::new(),
            redirect_path_prefix: String::new(),
            files_table: default_files_table(),
            links_table: default_links_table(),
            verify_existing: true,
            clean_interval_secs: default_clean_interval(),
            clean_after_secs: default_clean_after(),
        }
    }

    /// Check the fields that don't need the network or the database.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(StorageError::Config("bucket name is empty".to_string()));
        }
        if self.machines.is_empty() {
            return Err(StorageError::Config(format!(
                "bucket {}: machines is empty",
                self.name
            )));
        }
        if self.dir.as_os_str().is_empty() {
            return Err(StorageError::Config(format!("bucket {}: dir is empty", self.name)));
        }
        if !self.dir.is_absolute() {
            return Err(StorageError::Config(format!(
                "bucket {}: dir is not an absolute path: {}",
                self.name,
                self.dir.display()
            )));
        }
        self.placement()?;
        self.tables()?;
        crate::urls::check_prefix(&self.download_url_prefix)
    }

    pub fn placement(&self) -> Result<Placement> {
        Placement::new(self.dir_depth.unwrap_or(DEFAULT_DEPTH))
    }

    pub fn tables(&self) -> Result<Tables> {
        Tables::new(&self.files_table, &self.links_table)
    }

    /// Redirect prefix with a leading `/`, or empty
    pub fn redirect_prefix(&self) -> String {
        let prefix = self.redirect_path_prefix.trim_end_matches('/');
        if prefix.is_empty() || prefix.starts_with('/') {
            prefix.to_string()
        } else {
            format!("/{}", prefix)
        }
    }

    /// Interval and grace window of the collector, if it is enabled
    pub fn clean_schedule(&self) -> Option<(Duration, Duration)> {
        if self.clean_interval_secs == 0 || self.clean_after_secs == 0 {
            return None;
        }
        Some((
            Duration::from_secs(self.clean_interval_secs),
            Duration::from_secs(self.clean_after_secs),
        ))
    }
}
