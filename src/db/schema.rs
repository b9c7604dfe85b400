//! Catalog schema definitions

use rusqlite::Connection;
use tracing::info;

use super::Tables;
use crate::error::Result;

/// Create both catalog tables if they do not exist yet
pub fn init_schema(conn: &Connection, tables: &Tables) -> Result<()> {
    conn.execute_batch(&files_schema(tables.files()))?;
    conn.execute_batch(&links_schema(tables.links()))?;
    info!(
        files = tables.files(),
        links = tables.links(),
        "Catalog schema ready"
    );
    Ok(())
}

/// One row per distinct content hash. Rows never change after insert
/// except for `transformations`.
fn files_schema(table: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {table} (
    hash            TEXT PRIMARY KEY NOT NULL,
    type            TEXT NOT NULL,
    size            INTEGER NOT NULL,
    transformations TEXT NOT NULL DEFAULT '{{}}',
    -- microseconds since the Unix epoch
    created_at      INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS {table}_created_at_index ON {table}(created_at);
"#
    )
}

/// "This content is currently used by this object."
fn links_schema(table: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {table} (
    file       TEXT NOT NULL,
    object     TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    UNIQUE (file, object)
);

CREATE INDEX IF NOT EXISTS {table}_object_index ON {table}(object);
"#
    )
}
