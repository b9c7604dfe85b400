//! File Storage - content-addressed files with a relational link catalog
//!
//! Uploaded files are stored once per distinct content, named by the
//! SHA-256 of their bytes. The catalog records which objects (rows of the
//! caller's own tables) use which files; a background collector deletes
//! files nothing uses anymore.
//!
//! ## Architecture
//!
//! - **Catalog**: SQLite `files` and `file_links` tables, the source of
//!   truth for which content exists
//! - **Placement**: hash-derived directory shards under each bucket root
//! - **Nodes**: the local machine plus remote replicas reached over ssh/scp
//! - **Collector**: periodic sweep of unlinked files past a grace window
//!
//! ## Storage Layout
//!
//! ```text
//! /data/files/               # bucket dir, identical on every machine
//! ├── T/E/a/                 # first 3 characters of the hash
//! │   └── TEaLOxaZn9lX...    # 43-character URL-safe base64 SHA-256
//! └── H/E/b/
//!     └── HEbi8PV2cRPf...
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::io::Cursor;
//! use std::path::Path;
//! use file_storage::{Bucket, BucketConfig};
//!
//! # fn main() -> file_storage::Result<()> {
//! let config = BucketConfig::new("img", vec!["localhost".into()], "/data/img");
//! let bucket = Bucket::open(&config, Path::new("/var/lib/file-storage/catalog.db"))?;
//!
//! let hashes = bucket.save(None, None, "orders.42", &mut [Cursor::new(b"bytes".to_vec())])?;
//! bucket.link_only(None, "orders.42", &hashes)?;
//! let bytes = bucket.read_file(None, &hashes[0], "orders.42")?;
//! # Ok(())
//! # }
//! ```

pub mod bucket;
pub mod collector;
pub mod config;
pub mod db;
pub mod digest;
pub mod disk;
pub mod error;
pub mod html;
pub mod link_object;
pub mod nodes;
pub mod placement;
pub mod policy;
pub mod registry;
pub mod sniff;
pub mod urls;

// Re-exports
pub use bucket::{Bucket, Download, DownloadBody, EXPIRES};
pub use collector::{Collector, CollectorConfig, CollectorEvent};
pub use config::{BucketConfig, Config};
pub use db::files::FileRecord;
pub use db::{Catalog, CatalogStats, Executor, Tables};
pub use digest::{check_hash, compute_hash, inspect, is_hash, Inspection, HASH_LEN};
pub use error::{ErrorKind, Result, StorageError};
pub use html::{img_src_to_file_hash, replace_img_src};
pub use link_object::LinkObject;
pub use nodes::{NodeSet, Ssh, Transport};
pub use placement::Placement;
pub use policy::{Check, ImagePolicy};
pub use registry::Registry;
pub use urls::{file_hash, file_hashes, try_file_hash};
