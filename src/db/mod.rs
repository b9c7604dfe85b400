//! SQLite catalog of stored files and their links
//!
//! ## Tables
//!
//! - `files` - one row per distinct content hash (type, size, transformations)
//! - `file_links` - many-to-many rows between a file hash and a link object
//!
//! Both table names are configurable per bucket. Every statement goes
//! through [`Executor`], so the same code runs on a pooled connection or on
//! a transaction the caller already holds.

pub mod files;
pub mod links;
pub mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, Row, ToSql, Transaction, TransactionBehavior};
use tracing::{debug, info};

use crate::error::{Result, StorageError};

/// The three primitives the catalog needs from a database handle.
pub trait Executor {
    /// Run a mutating statement, returning the number of affected rows.
    fn execute(&self, sql: &str, params: &[&dyn ToSql]) -> Result<usize>;

    /// Run a row-returning statement, calling `each` for every row.
    fn query(
        &self,
        sql: &str,
        params: &[&dyn ToSql],
        each: &mut dyn FnMut(&Row<'_>) -> rusqlite::Result<()>,
    ) -> Result<()>;

    /// Run a statement expected to return at most one row. Returns whether
    /// a row was found.
    fn query_row(
        &self,
        sql: &str,
        params: &[&dyn ToSql],
        each: &mut dyn FnMut(&Row<'_>) -> rusqlite::Result<()>,
    ) -> Result<bool>;
}

impl Executor for Connection {
    fn execute(&self, sql: &str, params: &[&dyn ToSql]) -> Result<usize> {
        let mut stmt = self.prepare_cached(sql)?;
        Ok(stmt.execute(params)?)
    }

    fn query(
        &self,
        sql: &str,
        params: &[&dyn ToSql],
        each: &mut dyn FnMut(&Row<'_>) -> rusqlite::Result<()>,
    ) -> Result<()> {
        let mut stmt = self.prepare_cached(sql)?;
        let mut rows = stmt.query(params)?;
        while let Some(row) = rows.next()? {
            each(row)?;
        }
        Ok(())
    }

    fn query_row(
        &self,
        sql: &str,
        params: &[&dyn ToSql],
        each: &mut dyn FnMut(&Row<'_>) -> rusqlite::Result<()>,
    ) -> Result<bool> {
        let mut stmt = self.prepare_cached(sql)?;
        let mut rows = stmt.query(params)?;
        match rows.next()? {
            Some(row) => {
                each(row)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Collect the first column of every row as a string.
pub(crate) fn query_strings(
    db: &dyn Executor,
    sql: &str,
    params: &[&dyn ToSql],
) -> Result<Vec<String>> {
    let mut out = Vec::new();
    db.query(sql, params, &mut |row| {
        out.push(row.get(0)?);
        Ok(())
    })?;
    Ok(out)
}

/// `?, ?, ?` for `n` bound values.
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Current time in microseconds since the Unix epoch.
pub(crate) fn now_micros() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

/// Names of the two catalog tables.
///
/// Identifiers cannot be bound as statement parameters, so they are
/// validated once here and formatted into the SQL text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tables {
    files: String,
    links: String,
}

impl Tables {
    pub fn new(files: impl Into<String>, links: impl Into<String>) -> Result<Self> {
        let files = files.into();
        let links = links.into();
        for name in [&files, &links] {
            if !is_identifier(name) {
                return Err(StorageError::Config(format!("invalid table name: {:?}", name)));
            }
        }
        if files == links {
            return Err(StorageError::Config(
                "files table and links table must differ".to_string(),
            ));
        }
        Ok(Self { files, links })
    }

    pub fn files(&self) -> &str {
        &self.files
    }

    pub fn links(&self) -> &str {
        &self.links
    }
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            files: "files".to_string(),
            links: "file_links".to_string(),
        }
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Catalog database for one bucket
pub struct Catalog {
    conn: Mutex<Connection>,
    tables: Tables,
}

impl Catalog {
    /// Open or create the catalog database at `path`
    pub fn open(path: &Path, tables: Tables) -> Result<Self> {
        info!("Opening SQLite catalog at {:?}", path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;

        // WAL lets several buckets and processes share one file
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(Duration::from_secs(5))?;

        Self::with_connection(conn, tables)
    }

    /// Open an in-memory catalog (for testing)
    pub fn open_in_memory(tables: Tables) -> Result<Self> {
        debug!("Opening in-memory SQLite catalog");
        Self::with_connection(Connection::open_in_memory()?, tables)
    }

    fn with_connection(conn: Connection, tables: Tables) -> Result<Self> {
        schema::init_schema(&conn, &tables)?;
        Ok(Self {
            conn: Mutex::new(conn),
            tables,
        })
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Internal(format!("Lock poisoned: {}", e)))
    }

    /// Run `f` inside a transaction.
    ///
    /// When the caller supplies `tx`, `f` joins it and committing is left to
    /// the caller. Otherwise an immediate transaction is opened on the
    /// catalog's own connection, committed when `f` succeeds and rolled back
    /// when it fails or panics.
    pub fn with_tx<T, F>(&self, tx: Option<&Transaction<'_>>, f: F) -> Result<T>
    where
        F: FnOnce(&dyn Executor) -> Result<T>,
    {
        if let Some(tx) = tx {
            return f(&**tx);
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&*tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Run `f` with a transaction on the catalog's connection so several
    /// store operations can be folded into one unit of work. Pass the
    /// transaction to each call as `Some(tx)`.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Row counts for both tables
    pub fn stats(&self) -> Result<CatalogStats> {
        self.with_tx(None, |db| {
            let mut stats = CatalogStats::default();
            let files_sql = format!("SELECT COUNT(*), COALESCE(SUM(size), 0) FROM {}", self.tables.files());
            db.query_row(&files_sql, &[], &mut |row| {
                stats.files = row.get::<_, i64>(0)? as u64;
                stats.total_bytes = row.get::<_, i64>(1)? as u64;
                Ok(())
            })?;
            let links_sql = format!("SELECT COUNT(*) FROM {}", self.tables.links());
            db.query_row(&links_sql, &[], &mut |row| {
                stats.links = row.get::<_, i64>(0)? as u64;
                Ok(())
            })?;
            Ok(stats)
        })
    }
}

/// Catalog statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct CatalogStats {
    pub files: u64,
    pub links: u64,
    pub total_bytes: u64,
}
