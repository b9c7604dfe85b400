//! Directory sharding of stored files
//!
//! A file lives at `<root>/<c1>/<c2>/.../<c_depth>/<hash>`, where `c_i` is
//! the i-th character of its hash. With the default depth of 3 and a
//! 64-letter alphabet that spreads files over 262,144 leaf directories.
//!
//! The path is recomputed from the hash everywhere (write, read, delete),
//! so changing the depth of an existing bucket orphans its files.

use std::path::{Path, PathBuf};

use crate::error::{Result, StorageError};

pub const DEFAULT_DEPTH: u8 = 3;
pub const MAX_DEPTH: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    depth: u8,
}

impl Placement {
    pub fn new(depth: u8) -> Result<Self> {
        if depth > MAX_DEPTH {
            return Err(StorageError::Config(format!(
                "dir depth must be at most {}, got {}",
                MAX_DEPTH, depth
            )));
        }
        Ok(Self { depth })
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Directory of `hash`, relative to the storage root. `hash` must be a
    /// valid file hash.
    pub fn dir(&self, hash: &str) -> PathBuf {
        self.shards(hash).collect()
    }

    /// Path of `hash`, relative to the storage root.
    pub fn relative_path(&self, hash: &str) -> PathBuf {
        self.dir(hash).join(hash)
    }

    /// Absolute path of `hash` under `root`.
    pub fn path(&self, root: &Path, hash: &str) -> PathBuf {
        root.join(self.relative_path(hash))
    }

    /// Path of `hash` with `/` separators, for URLs and redirect headers.
    pub fn url_path(&self, hash: &str) -> String {
        let mut parts: Vec<&str> = self.shards(hash).collect();
        parts.push(hash);
        parts.join("/")
    }

    fn shards<'a>(&self, hash: &'a str) -> impl Iterator<Item = &'a str> {
        hash.char_indices()
            .take(self.depth as usize)
            .map(move |(i, c)| &hash[i..i + c.len_utf8()])
    }
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            depth: DEFAULT_DEPTH,
        }
    }
}
