//! File records: dedup insert, lookup and the cleanup query

use std::collections::HashSet;
use std::time::Duration;

use rusqlite::{Row, ToSql};
use serde::Serialize;
use tracing::debug;

use super::{now_micros, placeholders, query_strings, Executor, Tables};
use crate::error::Result;

/// A file about to be catalogued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFile {
    pub hash: String,
    pub content_type: String,
    pub size: u64,
}

/// File row from the catalog
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileRecord {
    pub hash: String,
    pub content_type: String,
    pub size: u64,
    pub transformations: serde_json::Value,
    /// Microseconds since the Unix epoch
    pub created_at: i64,
}

/// Insert `records` in one statement, skipping hashes already present.
///
/// Returns the hashes this call actually inserted. The unique hash column
/// decides races between concurrent uploads of the same content: exactly
/// one of them sees the hash as new.
pub fn insert_file_records(
    db: &dyn Executor,
    tables: &Tables,
    records: &[NewFile],
) -> Result<HashSet<String>> {
    if records.is_empty() {
        return Ok(HashSet::new());
    }

    let now = now_micros();
    let sizes: Vec<i64> = records.iter().map(|r| r.size as i64).collect();
    let mut params: Vec<&dyn ToSql> = Vec::with_capacity(records.len() * 4);
    for (record, size) in records.iter().zip(&sizes) {
        params.push(&record.hash);
        params.push(&record.content_type);
        params.push(size);
        params.push(&now);
    }

    let values = vec![format!("({})", placeholders(4)); records.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} (hash, type, size, created_at) VALUES {}
         ON CONFLICT (hash) DO NOTHING
         RETURNING hash",
        tables.files(),
        values
    );

    let inserted: HashSet<String> = query_strings(db, &sql, &params)?.into_iter().collect();
    debug!(
        requested = records.len(),
        inserted = inserted.len(),
        "Inserted file records"
    );
    Ok(inserted)
}

/// Delete and return every file that has no link and was created more than
/// `older_than` ago.
///
/// Deleting and enumerating happen in one statement, so there is no window
/// between choosing a file and removing its row.
pub fn cleanup(db: &dyn Executor, tables: &Tables, older_than: Duration) -> Result<Vec<FileRecord>> {
    let cutoff = now_micros().saturating_sub(older_than.as_micros().min(i64::MAX as u128) as i64);
    let sql = format!(
        "DELETE FROM {files}
         WHERE NOT EXISTS (SELECT 1 FROM {links} WHERE {links}.file = {files}.hash)
           AND created_at < ?
         RETURNING hash, type, size, transformations, created_at",
        files = tables.files(),
        links = tables.links(),
    );
    let mut removed = Vec::new();
    db.query(&sql, &[&cutoff], &mut |row| {
        removed.push(record_from_row(row)?);
        Ok(())
    })?;
    Ok(removed)
}

/// Put back rows taken by [`cleanup`] whose files could not be removed, so
/// a later cycle picks them up again. Hashes saved again in the meantime
/// keep their new row.
pub fn restore(db: &dyn Executor, tables: &Tables, records: &[FileRecord]) -> Result<()> {
    let sql = format!(
        "INSERT INTO {} (hash, type, size, transformations, created_at) VALUES (?, ?, ?, ?, ?)
         ON CONFLICT (hash) DO NOTHING",
        tables.files()
    );
    for record in records {
        let transformations = serde_json::to_string(&record.transformations)?;
        db.execute(
            &sql,
            &[
                &record.hash,
                &record.content_type,
                &(record.size as i64),
                &transformations,
                &record.created_at,
            ],
        )?;
    }
    debug!(restored = records.len(), "Restored file records");
    Ok(())
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let transformations: String = row.get(3)?;
    Ok(FileRecord {
        hash: row.get(0)?,
        content_type: row.get(1)?,
        size: row.get::<_, i64>(2)? as u64,
        transformations: serde_json::from_str(&transformations).unwrap_or(serde_json::Value::Null),
        created_at: row.get(4)?,
    })
}

/// Get one file record by hash
pub fn file_info(db: &dyn Executor, tables: &Tables, hash: &str) -> Result<Option<FileRecord>> {
    let sql = format!(
        "SELECT hash, type, size, transformations, created_at FROM {} WHERE hash = ?",
        tables.files()
    );
    let mut record = None;
    db.query_row(&sql, &[&hash], &mut |row| {
        record = Some(record_from_row(row)?);
        Ok(())
    })?;
    Ok(record)
}

/// Get the stored content type, if the file is catalogued
pub fn content_type_of(db: &dyn Executor, tables: &Tables, hash: &str) -> Result<Option<String>> {
    let sql = format!("SELECT type FROM {} WHERE hash = ?", tables.files());
    let mut content_type: Option<String> = None;
    db.query_row(&sql, &[&hash], &mut |row| {
        content_type = Some(row.get(0)?);
        Ok(())
    })?;
    Ok(content_type)
}

/// Replace the transformation metadata of a file. Returns whether the file
/// exists.
pub fn set_transformations(
    db: &dyn Executor,
    tables: &Tables,
    hash: &str,
    transformations: &serde_json::Value,
) -> Result<bool> {
    let json = serde_json::to_string(transformations)?;
    let sql = format!("UPDATE {} SET transformations = ? WHERE hash = ?", tables.files());
    Ok(db.execute(&sql, &[&json, &hash])? > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Catalog, Tables};

    const FILE1: &str = "TEaLOxaZn9lXgYlXbV93DLShatn8oOeYolHwClSofF1";
    const FILE2: &str = "TEaLOxaZn9lXgYlXbV93DLShatn8oOeYolHwClSofF2";

    fn new_file(hash: &str) -> NewFile {
        NewFile {
            hash: hash.to_string(),
            content_type: "text/plain; charset=utf-8".to_string(),
            size: 5,
        }
    }

    #[test]
    fn test_insert_reports_new_hashes() {
        let catalog = Catalog::open_in_memory(Tables::default()).unwrap();
        let tables = catalog.tables().clone();

        let first = catalog
            .with_tx(None, |db| insert_file_records(db, &tables, &[new_file(FILE1)]))
            .unwrap();
        assert_eq!(first, HashSet::from([FILE1.to_string()]));

        let second = catalog
            .with_tx(None, |db| {
                insert_file_records(db, &tables, &[new_file(FILE1), new_file(FILE2)])
            })
            .unwrap();
        assert_eq!(second, HashSet::from([FILE2.to_string()]));
        assert_eq!(catalog.stats().unwrap().files, 2);
    }

    #[test]
    fn test_duplicate_hash_in_one_batch() {
        let catalog = Catalog::open_in_memory(Tables::default()).unwrap();
        let tables = catalog.tables().clone();
        let inserted = catalog
            .with_tx(None, |db| {
                insert_file_records(db, &tables, &[new_file(FILE1), new_file(FILE1)])
            })
            .unwrap();
        assert_eq!(inserted.len(), 1);
        assert_eq!(catalog.stats().unwrap().files, 1);
    }

    #[test]
    fn test_cleanup_respects_links_and_age() {
        let catalog = Catalog::open_in_memory(Tables::default()).unwrap();
        let tables = catalog.tables().clone();
        catalog
            .with_tx(None, |db| {
                insert_file_records(db, &tables, &[new_file(FILE1), new_file(FILE2)])?;
                db.execute(
                    "INSERT INTO file_links (file, object, created_at) VALUES (?, ?, ?)",
                    &[&FILE2, &"orders.42", &0i64],
                )
            })
            .unwrap();

        // still inside the grace window
        let removed = catalog
            .with_tx(None, |db| cleanup(db, &tables, Duration::from_secs(3600)))
            .unwrap();
        assert!(removed.is_empty());

        std::thread::sleep(Duration::from_millis(2));
        let removed = catalog
            .with_tx(None, |db| cleanup(db, &tables, Duration::ZERO))
            .unwrap();
        let hashes: Vec<_> = removed.iter().map(|r| r.hash.as_str()).collect();
        assert_eq!(hashes, vec![FILE1]);
        assert_eq!(catalog.stats().unwrap().files, 1);
    }

    #[test]
    fn test_restore_after_cleanup() {
        let catalog = Catalog::open_in_memory(Tables::default()).unwrap();
        let tables = catalog.tables().clone();
        catalog
            .with_tx(None, |db| insert_file_records(db, &tables, &[new_file(FILE1)]))
            .unwrap();
        let before = catalog
            .with_tx(None, |db| file_info(db, &tables, FILE1))
            .unwrap()
            .unwrap();

        std::thread::sleep(Duration::from_millis(2));
        let removed = catalog
            .with_tx(None, |db| cleanup(db, &tables, Duration::ZERO))
            .unwrap();
        assert_eq!(removed, vec![before.clone()]);

        catalog
            .with_tx(None, |db| restore(db, &tables, &removed))
            .unwrap();
        let after = catalog
            .with_tx(None, |db| file_info(db, &tables, FILE1))
            .unwrap();
        assert_eq!(after, Some(before));

        // restored rows keep their age and are collected again
        let again = catalog
            .with_tx(None, |db| cleanup(db, &tables, Duration::ZERO))
            .unwrap();
        assert_eq!(again.len(), 1);
    }

    #[test]
    fn test_file_info_and_transformations() {
        let catalog = Catalog::open_in_memory(Tables::default()).unwrap();
        let tables = catalog.tables().clone();
        catalog
            .with_tx(None, |db| insert_file_records(db, &tables, &[new_file(FILE1)]))
            .unwrap();

        let info = catalog
            .with_tx(None, |db| file_info(db, &tables, FILE1))
            .unwrap()
            .unwrap();
        assert_eq!(info.size, 5);
        assert_eq!(info.transformations, serde_json::json!({}));

        let thumb = serde_json::json!({"thumb": {"width": 64}});
        let updated = catalog
            .with_tx(None, |db| set_transformations(db, &tables, FILE1, &thumb))
            .unwrap();
        assert!(updated);
        let info = catalog
            .with_tx(None, |db| file_info(db, &tables, FILE1))
            .unwrap()
            .unwrap();
        assert_eq!(info.transformations, thumb);

        let missing = catalog
            .with_tx(None, |db| content_type_of(db, &tables, FILE2))
            .unwrap();
        assert_eq!(missing, None);
    }
}
