//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use file_storage::{disk, Bucket, BucketConfig, Catalog, NodeSet, Result, StorageError, Transport};
use tempfile::TempDir;

/// Transport that keeps each remote node in its own local directory:
/// `<base>/<addr>/<path>`. Addresses listed in `failing` refuse every
/// command; `remove` can be slowed down to stand in for a slow ssh.
#[derive(Debug)]
pub struct DirTransport {
    base: PathBuf,
    failing: Mutex<HashSet<String>>,
    remove_delay: Mutex<Duration>,
    removes_started: AtomicUsize,
}

impl DirTransport {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            failing: Mutex::new(HashSet::new()),
            remove_delay: Mutex::new(Duration::ZERO),
            removes_started: AtomicUsize::new(0),
        }
    }

    pub fn set_remove_delay(&self, delay: Duration) {
        *self.remove_delay.lock().unwrap() = delay;
    }

    /// Number of `remove` calls entered so far
    pub fn removes_started(&self) -> usize {
        self.removes_started.load(Ordering::SeqCst)
    }

    /// Root of `addr`'s copy of the bucket
    pub fn node_root(&self, addr: &str) -> PathBuf {
        self.base.join(addr)
    }

    pub fn set_failing(&self, addr: &str, failing: bool) {
        let mut set = self.failing.lock().unwrap();
        if failing {
            set.insert(addr.to_string());
        } else {
            set.remove(addr);
        }
    }

    fn check(&self, addr: &str) -> Result<()> {
        if self.failing.lock().unwrap().contains(addr) {
            return Err(StorageError::Remote {
                addr: addr.to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

impl Transport for DirTransport {
    fn push(&self, addr: &str, _root: &Path, path: &Path, src: &Path) -> Result<()> {
        self.check(addr)?;
        let mut file = fs::File::open(src)?;
        disk::write_new(&self.node_root(addr).join(path), &mut file)?;
        Ok(())
    }

    fn exists(&self, addr: &str, _root: &Path, path: &Path) -> Result<bool> {
        self.check(addr)?;
        Ok(self.node_root(addr).join(path).exists())
    }

    fn remove(&self, addr: &str, _root: &Path, path: &Path) -> Result<()> {
        self.removes_started.fetch_add(1, Ordering::SeqCst);
        let delay = *self.remove_delay.lock().unwrap();
        std::thread::sleep(delay);
        self.check(addr)?;
        let root = self.node_root(addr);
        disk::remove_and_prune(&root, &root.join(path))
    }
}

pub struct Fixture {
    pub temp: TempDir,
    pub config: BucketConfig,
    pub transport: Arc<DirTransport>,
}

impl Fixture {
    /// Bucket rooted at `<temp>/local` whose remotes live under
    /// `<temp>/remote/<addr>`.
    pub fn new(local: bool, remotes: &[&str]) -> Self {
        let temp = TempDir::new().unwrap();
        let mut machines: Vec<String> = remotes.iter().map(|r| r.to_string()).collect();
        if local {
            machines.insert(0, "localhost".to_string());
        }
        let config = BucketConfig::new("test", machines, temp.path().join("local"));
        let transport = Arc::new(DirTransport::new(temp.path().join("remote")));
        Self {
            temp,
            config,
            transport,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.temp.path().join("catalog.db")
    }

    /// Open a bucket with its own connection to the shared catalog file.
    pub fn bucket(&self) -> Bucket {
        let catalog = Catalog::open(&self.db_path(), self.config.tables().unwrap()).unwrap();
        let local = self.config.machines.iter().any(|m| m == "localhost");
        let remotes = self
            .config
            .machines
            .iter()
            .filter(|m| *m != "localhost")
            .cloned()
            .collect();
        Bucket::new(
            &self.config,
            catalog,
            NodeSet::new(local, remotes),
            self.transport.clone(),
        )
        .unwrap()
    }

    pub fn remote_path(&self, addr: &str, bucket: &Bucket, hash: &str) -> PathBuf {
        bucket
            .placement()
            .path(&self.transport.node_root(addr), hash)
    }
}

pub fn cursors(contents: &[&[u8]]) -> Vec<Cursor<Vec<u8>>> {
    contents.iter().map(|c| Cursor::new(c.to_vec())).collect()
}

/// Let the clock pass every `created_at` written so far, so a zero grace
/// window covers them.
pub fn age_records() {
    std::thread::sleep(Duration::from_millis(5));
}

/// Every regular file under `dir`, relative to it
pub fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let Ok(entries) = fs::read_dir(&current) else {
            continue;
        };
        for entry in entries {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                out.push(path.strip_prefix(dir).unwrap().to_path_buf());
            }
        }
    }
    out.sort();
    out
}
