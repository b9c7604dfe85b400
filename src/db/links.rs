//! Link operations between files and the objects that use them
//!
//! Every operation is scoped to one object string. Hashes are checked for
//! shape before any statement runs, and mutating operations refuse an
//! empty object.

use rusqlite::ToSql;
use tracing::debug;

use super::{now_micros, placeholders, query_strings, Executor, Tables};
use crate::digest::check_hash;
use crate::error::{Result, StorageError};

fn check_object(object: &str) -> Result<()> {
    if object.is_empty() {
        return Err(StorageError::EmptyObject);
    }
    Ok(())
}

/// Link `files` to `object`. Pairs that already exist are left untouched,
/// keeping their original creation time.
pub fn link(db: &dyn Executor, tables: &Tables, object: &str, files: &[String]) -> Result<()> {
    check_object(object)?;
    check_hash(files)?;
    if files.is_empty() {
        return Ok(());
    }

    let now = now_micros();
    let mut params: Vec<&dyn ToSql> = Vec::with_capacity(files.len() * 3);
    for file in files {
        params.push(file);
        params.push(&object);
        params.push(&now);
    }
    let values = vec![format!("({})", placeholders(3)); files.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} (file, object, created_at) VALUES {}
         ON CONFLICT (file, object) DO NOTHING",
        tables.links(),
        values
    );
    let added = db.execute(&sql, &params)?;
    debug!(object = %object, requested = files.len(), added, "Linked files");
    Ok(())
}

/// Make `files` exactly the set linked to `object`: missing links are added,
/// links to any other file are removed. An empty `files` unlinks everything.
///
/// Run this inside one transaction (see [`Catalog::with_tx`](super::Catalog::with_tx)).
pub fn link_only(db: &dyn Executor, tables: &Tables, object: &str, files: &[String]) -> Result<()> {
    check_object(object)?;
    check_hash(files)?;
    if files.is_empty() {
        return unlink_all_of(db, tables, object);
    }

    let mut params: Vec<&dyn ToSql> = Vec::with_capacity(files.len() + 1);
    params.push(&object);
    for file in files {
        params.push(file);
    }
    let sql = format!(
        "DELETE FROM {} WHERE object = ? AND file NOT IN ({})",
        tables.links(),
        placeholders(files.len())
    );
    let removed = db.execute(&sql, &params)?;
    debug!(object = %object, removed, "Removed links outside the new set");

    link(db, tables, object, files)
}

/// Remove the links between `files` and `object`. Files that were never
/// linked are ignored.
pub fn unlink(db: &dyn Executor, tables: &Tables, object: &str, files: &[String]) -> Result<()> {
    check_object(object)?;
    check_hash(files)?;
    if files.is_empty() {
        return Ok(());
    }

    let mut params: Vec<&dyn ToSql> = Vec::with_capacity(files.len() + 1);
    params.push(&object);
    for file in files {
        params.push(file);
    }
    let sql = format!(
        "DELETE FROM {} WHERE object = ? AND file IN ({})",
        tables.links(),
        placeholders(files.len())
    );
    let removed = db.execute(&sql, &params)?;
    debug!(object = %object, removed, "Unlinked files");
    Ok(())
}

/// Remove every link of `object`.
pub fn unlink_all_of(db: &dyn Executor, tables: &Tables, object: &str) -> Result<()> {
    check_object(object)?;
    let sql = format!("DELETE FROM {} WHERE object = ?", tables.links());
    let removed = db.execute(&sql, &[&object])?;
    debug!(object = %object, removed, "Unlinked all files");
    Ok(())
}

/// Move `files` from one owner to another.
pub fn transfer(
    db: &dyn Executor,
    tables: &Tables,
    from: &str,
    to: &str,
    files: &[String],
) -> Result<()> {
    check_object(from)?;
    link(db, tables, to, files)?;
    unlink(db, tables, from, files)
}

/// Whether `file` is linked to `object`.
pub fn linked(db: &dyn Executor, tables: &Tables, object: &str, file: &str) -> Result<bool> {
    check_hash(&[file])?;
    let sql = format!("SELECT 1 FROM {} WHERE object = ? AND file = ?", tables.links());
    db.query_row(&sql, &[&object, &file], &mut |_| Ok(()))
}

/// Like [`linked`], but a missing link is an error.
pub fn ensure_linked(db: &dyn Executor, tables: &Tables, object: &str, file: &str) -> Result<()> {
    if linked(db, tables, object, file)? {
        Ok(())
    } else {
        Err(StorageError::NotLinked {
            file: file.to_string(),
            object: object.to_string(),
        })
    }
}

/// Files linked to `object`, oldest link first.
pub fn files_of(db: &dyn Executor, tables: &Tables, object: &str) -> Result<Vec<String>> {
    let sql = format!(
        "SELECT file FROM {} WHERE object = ? ORDER BY created_at, rowid",
        tables.links()
    );
    query_strings(db, &sql, &[&object])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Catalog;

    const FILE1: &str = "TEaLOxaZn9lXgYlXbV93DLShatn8oOeYolHwClSofF1";
    const FILE2: &str = "TEaLOxaZn9lXgYlXbV93DLShatn8oOeYolHwClSofF2";
    const FILE3: &str = "TEaLOxaZn9lXgYlXbV93DLShatn8oOeYolHwClSofF3";
    const FILE4: &str = "TEaLOxaZn9lXgYlXbV93DLShatn8oOeYolHwClSofF4";

    fn files(hashes: &[&str]) -> Vec<String> {
        hashes.iter().map(|h| h.to_string()).collect()
    }

    fn catalog() -> (Catalog, Tables) {
        let catalog = Catalog::open_in_memory(Tables::default()).unwrap();
        let tables = catalog.tables().clone();
        (catalog, tables)
    }

    #[test]
    fn test_link_and_files_of() {
        let (catalog, tables) = catalog();
        catalog
            .with_tx(None, |db| {
                unlink_all_of(db, &tables, "object")?;
                link(db, &tables, "object", &files(&[FILE1, FILE2, FILE3]))?;
                // relinking keeps the original order
                link(db, &tables, "object", &files(&[FILE1]))
            })
            .unwrap();

        let linked_files = catalog
            .with_tx(None, |db| files_of(db, &tables, "object"))
            .unwrap();
        assert_eq!(linked_files, files(&[FILE1, FILE2, FILE3]));
    }

    #[test]
    fn test_link_only_then_unlink() {
        let (catalog, tables) = catalog();
        catalog
            .with_tx(None, |db| link(db, &tables, "object", &files(&[FILE1, FILE2, FILE3])))
            .unwrap();
        catalog
            .with_tx(None, |db| link_only(db, &tables, "object", &files(&[FILE3, FILE4])))
            .unwrap();

        let current = catalog
            .with_tx(None, |db| files_of(db, &tables, "object"))
            .unwrap();
        assert_eq!(current, files(&[FILE3, FILE4]));

        catalog
            .with_tx(None, |db| {
                ensure_linked(db, &tables, "object", FILE3)?;
                unlink(db, &tables, "object", &files(&[FILE3, FILE4]))
            })
            .unwrap();
        let still = catalog
            .with_tx(None, |db| linked(db, &tables, "object", FILE3))
            .unwrap();
        assert!(!still);
    }

    #[test]
    fn test_link_only_empty_unlinks_everything() {
        let (catalog, tables) = catalog();
        catalog
            .with_tx(None, |db| {
                link(db, &tables, "orders.1", &files(&[FILE1, FILE2]))?;
                link(db, &tables, "orders.2", &files(&[FILE1]))?;
                link_only(db, &tables, "orders.1", &[])
            })
            .unwrap();
        let (one, two) = catalog
            .with_tx(None, |db| {
                Ok((files_of(db, &tables, "orders.1")?, files_of(db, &tables, "orders.2")?))
            })
            .unwrap();
        assert!(one.is_empty());
        assert_eq!(two, files(&[FILE1]));
    }

    #[test]
    fn test_unlink_tolerates_missing_links() {
        let (catalog, tables) = catalog();
        catalog
            .with_tx(None, |db| unlink(db, &tables, "object", &files(&[FILE1, FILE2])))
            .unwrap();
        catalog
            .with_tx(None, |db| unlink(db, &tables, "object", &[]))
            .unwrap();
    }

    #[test]
    fn test_validation() {
        let (catalog, tables) = catalog();
        let err = catalog
            .with_tx(None, |db| link(db, &tables, "", &files(&[FILE1])))
            .unwrap_err();
        assert!(matches!(err, StorageError::EmptyObject));

        let err = catalog
            .with_tx(None, |db| link(db, &tables, "object", &files(&[FILE1, "nope"])))
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidHash(_)));
        // nothing was linked before the bad hash was found
        let none = catalog
            .with_tx(None, |db| files_of(db, &tables, "object"))
            .unwrap();
        assert!(none.is_empty());

        for result in [
            catalog.with_tx(None, |db| unlink_all_of(db, &tables, "")),
            catalog.with_tx(None, |db| link_only(db, &tables, "", &[])),
            catalog.with_tx(None, |db| unlink(db, &tables, "", &[])),
        ] {
            assert!(matches!(result, Err(StorageError::EmptyObject)));
        }
    }

    #[test]
    fn test_ensure_linked_to_other_object() {
        let (catalog, tables) = catalog();
        catalog
            .with_tx(None, |db| link(db, &tables, "orders.1", &files(&[FILE1])))
            .unwrap();
        let err = catalog
            .with_tx(None, |db| ensure_linked(db, &tables, "orders.2", FILE1))
            .unwrap_err();
        assert!(err.is_not_linked());
    }

    #[test]
    fn test_transfer() {
        let (catalog, tables) = catalog();
        catalog
            .with_tx(None, |db| {
                link(db, &tables, "drafts.1", &files(&[FILE1, FILE2]))?;
                transfer(db, &tables, "drafts.1", "posts.9", &files(&[FILE1]))
            })
            .unwrap();
        let (draft, post) = catalog
            .with_tx(None, |db| {
                Ok((files_of(db, &tables, "drafts.1")?, files_of(db, &tables, "posts.9")?))
            })
            .unwrap();
        assert_eq!(draft, files(&[FILE2]));
        assert_eq!(post, files(&[FILE1]));
    }
}
