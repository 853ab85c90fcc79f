//! Database connection setup
//!
//! Opens the SQLite database with WAL mode and creates the files_index
//! schema. The connection is handed to [`IndexStore`](super::IndexStore);
//! nothing else in the engine touches rusqlite directly.

use std::path::Path;

use rusqlite::Connection;

use crate::error::{IndexError, Result};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS files_index (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        path          TEXT NOT NULL UNIQUE,
        parent        TEXT,
        name          TEXT NOT NULL,
        type          TEXT NOT NULL,
        extension     TEXT,
        size          INTEGER DEFAULT 0,
        created_at    INTEGER,
        modified_at   INTEGER,
        hash          TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_files_name        ON files_index(name);
    CREATE INDEX IF NOT EXISTS idx_files_parent      ON files_index(parent);
    CREATE INDEX IF NOT EXISTS idx_files_ext         ON files_index(extension);
    CREATE INDEX IF NOT EXISTS idx_files_modified_at ON files_index(modified_at);
    CREATE INDEX IF NOT EXISTS idx_files_type        ON files_index(type);
"#;

/// Open (or create) the index database at `db_path` and initialize the schema.
pub fn open_connection(db_path: &Path) -> Result<Connection> {
    let db_dir = db_path
        .parent()
        .ok_or_else(|| IndexError::InvalidPath("Invalid database path".into()))?;

    if !db_dir.as_os_str().is_empty() {
        std::fs::create_dir_all(db_dir).map_err(IndexError::Io)?;
    }

    let conn = Connection::open(db_path).map_err(IndexError::Database)?;
    configure(&conn)?;

    tracing::info!("[DB] Initialized at: {}", db_path.display());
    Ok(conn)
}

/// In-memory database with the same schema. Used by tests and throwaway runs.
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().map_err(IndexError::Database)?;
    configure(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> Result<()> {
    // WAL for concurrent readers; NORMAL sync is durable enough for a cache.
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Recreate the schema after [`IndexStore::reset`](super::IndexStore::reset)
/// drops the table.
pub(crate) fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}
