//! A bucket: files on a set of machines, catalogued in one pair of tables
//!
//! ## Saving
//!
//! ```text
//! sniff + hash every stream ─▶ check ─▶ [tx: insert records, link] ─▶ write new files
//! ```
//!
//! The catalog decides which hashes are new. Only those are written, so
//! byte-identical uploads racing each other produce one file. Writes happen
//! after the catalog transaction commits; a failed write leaves a record
//! whose bytes are missing, which the next save of the same content repairs
//! when `verify_existing` is on.
//!
//! ## Collecting
//!
//! One cycle deletes unlinked records older than the grace window, then
//! removes their files from every node outside the transaction. Records
//! whose files could not be removed are restored so the next cycle retries
//! them.

use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::Transaction;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::config::BucketConfig;
use crate::db::files::{self, FileRecord, NewFile};
use crate::db::{links, Catalog, CatalogStats};
use crate::digest::{check_hash, inspect};
use crate::disk;
use crate::error::{Result, StorageError};
use crate::html;
use crate::nodes::{NodeSet, Ssh, Transport};
use crate::placement::Placement;
use crate::policy::Check;
use crate::urls;

/// `Expires` sent with every file whose content type is known. Content
/// never changes under its hash.
pub const EXPIRES: &str = "Thu, 31 Dec 2037 23:55:55 GMT";

pub struct Bucket {
    name: String,
    dir: PathBuf,
    placement: Placement,
    nodes: NodeSet,
    transport: Arc<dyn Transport>,
    catalog: Catalog,
    download_url_prefix: String,
    redirect_prefix: String,
    verify_existing: bool,
}

impl fmt::Debug for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bucket")
            .field("name", &self.name)
            .field("dir", &self.dir)
            .field("placement", &self.placement)
            .field("nodes", &self.nodes)
            .field("tables", self.catalog.tables())
            .finish_non_exhaustive()
    }
}

impl Bucket {
    /// Open a bucket whose catalog lives in the SQLite file `db_path`.
    /// Remote machines are reached over ssh.
    pub fn open(config: &BucketConfig, db_path: &Path) -> Result<Self> {
        config.validate()?;
        let catalog = Catalog::open(db_path, config.tables()?)?;
        let nodes = NodeSet::resolve(&config.machines, &config.scp_user)?;
        Self::new(config, catalog, nodes, Arc::new(Ssh))
    }

    /// Assemble a bucket from parts that are already resolved.
    pub fn new(
        config: &BucketConfig,
        catalog: Catalog,
        nodes: NodeSet,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;
        if catalog.tables() != &config.tables()? {
            return Err(StorageError::Config(format!(
                "bucket {}: catalog tables don't match the configuration",
                config.name
            )));
        }

        let bucket = Self {
            name: config.name.clone(),
            dir: config.dir.clone(),
            placement: config.placement()?,
            nodes,
            transport,
            catalog,
            download_url_prefix: config.download_url_prefix.clone(),
            redirect_prefix: config.redirect_prefix(),
            verify_existing: config.verify_existing,
        };
        info!(
            bucket = %bucket.name,
            dir = %bucket.dir.display(),
            depth = bucket.placement.depth(),
            local = bucket.nodes.is_local(),
            remotes = bucket.nodes.remotes().len(),
            "Bucket ready"
        );
        Ok(bucket)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    pub fn nodes(&self) -> &NodeSet {
        &self.nodes
    }

    /// The catalog, for folding several calls into one transaction with
    /// [`Catalog::transaction`]. Inside it, pass the transaction to every
    /// call; `None` would wait for the connection the transaction holds.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn stats(&self) -> Result<CatalogStats> {
        self.catalog.stats()
    }

    /// Absolute local path of `hash`
    pub fn file_path(&self, hash: &str) -> PathBuf {
        self.placement.path(&self.dir, hash)
    }

    // ------------------------------------------------------------------
    // Save pipeline
    // ------------------------------------------------------------------

    /// Store `files`, linking them to `object` unless it is empty. Returns
    /// the hash of every file in input order.
    ///
    /// `check` sees each file's content type and size; one rejection fails
    /// the whole batch before the catalog is touched. With a caller
    /// transaction the files are written before the caller commits.
    pub fn save<R: Read + Seek>(
        &self,
        tx: Option<&Transaction<'_>>,
        check: Option<Check<'_>>,
        object: &str,
        files: &mut [R],
    ) -> Result<Vec<String>> {
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let mut records = Vec::with_capacity(files.len());
        for file in files.iter_mut() {
            let inspection = inspect(file)?;
            if let Some(check) = check {
                check(&inspection.content_type, inspection.size)?;
            }
            records.push(NewFile {
                hash: inspection.hash,
                content_type: inspection.content_type,
                size: inspection.size,
            });
        }
        let hashes: Vec<String> = records.iter().map(|r| r.hash.clone()).collect();

        let tables = self.catalog.tables();
        let new = self.catalog.with_tx(tx, |db| {
            let new = files::insert_file_records(db, tables, &records)?;
            if !object.is_empty() {
                links::link(db, tables, object, &hashes)?;
            }
            Ok(new)
        })?;

        let mut seen = HashSet::new();
        for (file, hash) in files.iter_mut().zip(&hashes) {
            if !seen.insert(hash.as_str()) {
                continue;
            }
            if new.contains(hash) {
                self.store(file, hash, false)?;
            } else if self.verify_existing {
                self.store(file, hash, true)?;
            }
        }

        info!(
            bucket = %self.name,
            object = %object,
            files = hashes.len(),
            new = new.len(),
            "Saved files"
        );
        Ok(hashes)
    }

    /// [`save`](Self::save) the files at `paths`.
    pub fn save_files<P: AsRef<Path>>(
        &self,
        tx: Option<&Transaction<'_>>,
        check: Option<Check<'_>>,
        object: &str,
        paths: &[P],
    ) -> Result<Vec<String>> {
        let mut files = paths
            .iter()
            .map(|p| File::open(p.as_ref()))
            .collect::<io::Result<Vec<_>>>()?;
        self.save(tx, check, object, &mut files)
    }

    /// Put `content` on every node. With `only_missing`, nodes that already
    /// have the file are skipped.
    fn store<R: Read + Seek>(&self, content: &mut R, hash: &str, only_missing: bool) -> Result<()> {
        let relative = self.placement.relative_path(hash);
        let local_path = self.dir.join(&relative);

        let mut remotes = Vec::new();
        for addr in self.nodes.remotes() {
            if !only_missing || !self.transport.exists(addr, &self.dir, &relative)? {
                remotes.push(addr.as_str());
            }
        }

        if self.nodes.is_local() && !(only_missing && local_path.exists()) {
            content.seek(SeekFrom::Start(0))?;
            if disk::write_new(&local_path, content)? && only_missing {
                warn!(bucket = %self.name, hash = %hash, "Restored missing local file");
            }
        }
        if remotes.is_empty() {
            return Ok(());
        }

        // remote copies are made from the local replica, or from a staged
        // copy when this host holds none
        let staged;
        let src = if self.nodes.is_local() {
            local_path.as_path()
        } else {
            content.seek(SeekFrom::Start(0))?;
            let mut temp = NamedTempFile::new()?;
            io::copy(content, temp.as_file_mut())?;
            staged = temp;
            staged.path()
        };

        for addr in remotes {
            self.transport.push(addr, &self.dir, &relative, src)?;
            if only_missing {
                warn!(bucket = %self.name, hash = %hash, addr = %addr, "Restored missing remote file");
            } else {
                debug!(bucket = %self.name, hash = %hash, addr = %addr, "Copied file");
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Link algebra
    // ------------------------------------------------------------------

    pub fn link(&self, tx: Option<&Transaction<'_>>, object: &str, files: &[String]) -> Result<()> {
        let tables = self.catalog.tables();
        self.catalog
            .with_tx(tx, |db| links::link(db, tables, object, files))
    }

    /// Make `files` exactly the files linked to `object`, in one
    /// transaction.
    pub fn link_only(
        &self,
        tx: Option<&Transaction<'_>>,
        object: &str,
        files: &[String],
    ) -> Result<()> {
        let tables = self.catalog.tables();
        self.catalog
            .with_tx(tx, |db| links::link_only(db, tables, object, files))
    }

    pub fn unlink(&self, tx: Option<&Transaction<'_>>, object: &str, files: &[String]) -> Result<()> {
        let tables = self.catalog.tables();
        self.catalog
            .with_tx(tx, |db| links::unlink(db, tables, object, files))
    }

    pub fn unlink_all_of(&self, tx: Option<&Transaction<'_>>, object: &str) -> Result<()> {
        let tables = self.catalog.tables();
        self.catalog
            .with_tx(tx, |db| links::unlink_all_of(db, tables, object))
    }

    /// Move `files` from `from` to `to` in one transaction.
    pub fn transfer(
        &self,
        tx: Option<&Transaction<'_>>,
        from: &str,
        to: &str,
        files: &[String],
    ) -> Result<()> {
        let tables = self.catalog.tables();
        self.catalog
            .with_tx(tx, |db| links::transfer(db, tables, from, to, files))
    }

    pub fn linked(&self, tx: Option<&Transaction<'_>>, object: &str, file: &str) -> Result<bool> {
        let tables = self.catalog.tables();
        self.catalog
            .with_tx(tx, |db| links::linked(db, tables, object, file))
    }

    pub fn ensure_linked(&self, tx: Option<&Transaction<'_>>, object: &str, file: &str) -> Result<()> {
        let tables = self.catalog.tables();
        self.catalog
            .with_tx(tx, |db| links::ensure_linked(db, tables, object, file))
    }

    pub fn files_of(&self, tx: Option<&Transaction<'_>>, object: &str) -> Result<Vec<String>> {
        let tables = self.catalog.tables();
        self.catalog
            .with_tx(tx, |db| links::files_of(db, tables, object))
    }

    pub fn file_info(&self, tx: Option<&Transaction<'_>>, hash: &str) -> Result<Option<FileRecord>> {
        check_hash(&[hash])?;
        let tables = self.catalog.tables();
        self.catalog
            .with_tx(tx, |db| files::file_info(db, tables, hash))
    }

    /// Replace the transformation metadata of a catalogued file.
    pub fn set_transformations(
        &self,
        tx: Option<&Transaction<'_>>,
        hash: &str,
        transformations: &serde_json::Value,
    ) -> Result<()> {
        check_hash(&[hash])?;
        let tables = self.catalog.tables();
        let found = self
            .catalog
            .with_tx(tx, |db| files::set_transformations(db, tables, hash, transformations))?;
        if found {
            Ok(())
        } else {
            Err(StorageError::NotFound(hash.to_string()))
        }
    }

    // ------------------------------------------------------------------
    // Garbage collection
    // ------------------------------------------------------------------

    /// Run one collection cycle: delete every unlinked file older than
    /// `grace` from the catalog and from every node. Returns the deleted
    /// hashes.
    ///
    /// Rows are deleted in a short transaction and the files removed after
    /// it commits, so other writers are not held up by remote commands.
    /// Rows whose files could not be removed everywhere are put back for
    /// the next cycle and the first removal error is returned.
    pub fn collect_garbage(&self, grace: Duration) -> Result<Vec<String>> {
        let tables = self.catalog.tables();
        let taken = self
            .catalog
            .with_tx(None, |db| files::cleanup(db, tables, grace))?;

        let mut removed = Vec::with_capacity(taken.len());
        let mut failed = Vec::new();
        let mut first_error = None;
        for record in taken {
            match self.remove_everywhere(&record.hash) {
                Ok(()) => removed.push(record.hash),
                Err(e) => {
                    warn!(bucket = %self.name, hash = %record.hash, error = %e, "Failed to remove file");
                    first_error.get_or_insert(e);
                    failed.push(record);
                }
            }
        }

        if !removed.is_empty() {
            info!(bucket = %self.name, files = removed.len(), "Collected unlinked files");
        }
        match first_error {
            None => Ok(removed),
            Some(e) => {
                self.catalog
                    .with_tx(None, |db| files::restore(db, tables, &failed))?;
                Err(e)
            }
        }
    }

    fn remove_everywhere(&self, hash: &str) -> Result<()> {
        let relative = self.placement.relative_path(hash);
        if self.nodes.is_local() {
            disk::remove_and_prune(&self.dir, &self.dir.join(&relative))?;
        }
        for addr in self.nodes.remotes() {
            self.transport.remove(addr, &self.dir, &relative)?;
        }
        debug!(bucket = %self.name, hash = %hash, "Removed file from all nodes");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------

    fn authorize(&self, tx: Option<&Transaction<'_>>, file: &str, object: &str) -> Result<()> {
        check_hash(&[file])?;
        if object.is_empty() {
            return Ok(());
        }
        self.ensure_linked(tx, object, file)
    }

    fn open_local(&self, file: &str) -> Result<File> {
        File::open(self.file_path(file)).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound(file.to_string()),
            _ => StorageError::Io(e),
        })
    }

    /// Open the local copy of `file`. When `object` is not empty the file
    /// must be linked to it.
    pub fn open_file(&self, tx: Option<&Transaction<'_>>, file: &str, object: &str) -> Result<File> {
        self.authorize(tx, file, object)?;
        self.open_local(file)
    }

    /// Read the local copy of `file`, see [`open_file`](Self::open_file).
    pub fn read_file(&self, tx: Option<&Transaction<'_>>, file: &str, object: &str) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.open_file(tx, file, object)?.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    /// Prepare a download of `file`. With a redirect prefix configured the
    /// body is a path for the reverse proxy; otherwise it is the open file.
    pub fn download(&self, tx: Option<&Transaction<'_>>, file: &str, object: &str) -> Result<Download> {
        self.authorize(tx, file, object)?;
        let tables = self.catalog.tables();
        let content_type = self
            .catalog
            .with_tx(tx, |db| files::content_type_of(db, tables, file))?
            .filter(|t| !t.is_empty());

        let body = if self.redirect_prefix.is_empty() {
            DownloadBody::File(self.open_local(file)?)
        } else {
            DownloadBody::Redirect(format!(
                "{}/{}",
                self.redirect_prefix,
                self.placement.url_path(file)
            ))
        };
        Ok(Download { content_type, body })
    }

    /// URL a client can fetch `hash` from on behalf of `object`.
    pub fn download_url(&self, object: impl fmt::Display, hash: &str) -> String {
        urls::download_url(&self.download_url_prefix, &object.to_string(), hash)
    }

    pub fn download_urls<S: AsRef<str>>(&self, object: impl fmt::Display, hashes: &[S]) -> Vec<String> {
        urls::download_urls(&self.download_url_prefix, &object.to_string(), hashes)
    }

    /// Turn bare file hashes in `<img src>` into download URLs for `object`.
    pub fn img_src_to_download_url(&self, object: impl fmt::Display, html: &str) -> String {
        let object = object.to_string();
        html::img_src_hashes_to(html, |hash| {
            urls::download_url(&self.download_url_prefix, &object, hash)
        })
    }
}

/// A file ready to be served
#[derive(Debug)]
pub struct Download {
    /// Stored content type, if the file is catalogued
    pub content_type: Option<String>,
    pub body: DownloadBody,
}

#[derive(Debug)]
pub enum DownloadBody {
    /// Path for an `X-Accel-Redirect` header; the proxy sends the bytes
    Redirect(String),
    /// Stream this file as the response body
    File(File),
}

impl Download {
    /// Response headers for this download
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::new();
        if let Some(content_type) = &self.content_type {
            headers.push(("Content-Type", content_type.clone()));
            headers.push(("Expires", EXPIRES.to_string()));
        }
        if let DownloadBody::Redirect(path) = &self.body {
            headers.push(("X-Accel-Redirect", path.clone()));
        }
        headers
    }
}
