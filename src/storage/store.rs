// FILE: src/storage/store.rs
use std::path::{Path, MAIN_SEPARATOR};
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::types::ValueRef;
use rusqlite::{params, Connection};
use serde::Serialize;
use serde_json::Value;

use crate::error::{IndexError, Result};
use crate::storage::{FileKind, FileRecord};

/// One raw result row: column name to JSON value.
pub type Row = serde_json::Map<String, Value>;

/// Outcome of an arbitrary statement run through [`IndexStore::query`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryOutput {
    /// A SELECT-like statement: the full row set.
    Rows { rows: Vec<Row> },
    /// INSERT/UPDATE/DELETE: how much changed.
    Changes { changes: usize, last_insert_rowid: i64 },
    /// Anything else (DDL etc.), batch-executed with no result set.
    Done,
}

const UPSERT_SQL: &str = r#"
    INSERT INTO files_index (path, parent, name, type, extension, size, created_at, modified_at, hash)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
    ON CONFLICT(path) DO UPDATE SET
        parent      = excluded.parent,
        name        = excluded.name,
        type        = excluded.type,
        extension   = excluded.extension,
        size        = excluded.size,
        created_at  = COALESCE(excluded.created_at, files_index.created_at),
        modified_at = excluded.modified_at,
        hash        = excluded.hash
"#;

/// The path-keyed files index.
///
/// All reads and writes go through this store; the scanner and the transfer
/// operator never touch the table directly. Cloning is cheap; the inner
/// connection is reference-counted, and the mutex serializes mutations so a
/// batch upsert is never interleaved with another writer.
#[derive(Clone)]
pub struct IndexStore {
    conn: Arc<Mutex<Connection>>,
}

impl IndexStore {
    /// Open (or create) a store backed by the database at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = super::connection::open_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = super::connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| IndexError::State("Poisoned lock".into()))
    }

    /// Insert-or-merge one record, keyed by path.
    ///
    /// Every column is overwritten by the incoming value except `created_at`,
    /// which is kept from the existing row when the incoming value is None.
    pub fn upsert(&self, record: &FileRecord) -> Result<()> {
        let conn = self.lock()?;
        run_upsert(&conn, record)?;
        Ok(())
    }

    /// Insert-or-merge a batch as one transaction. All-or-nothing: a failure
    /// on any record rolls back the whole batch.
    pub fn upsert_many(&self, records: &[FileRecord]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(UPSERT_SQL)?;
            for record in records {
                stmt.execute(params![
                    record.path,
                    record.parent,
                    record.name,
                    record.kind.as_str(),
                    record.extension,
                    record.size as i64,
                    record.created_at,
                    record.modified_at,
                    record.hash,
                ])
                .map_err(map_constraint)?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Remove exactly one row.
    pub fn delete_by_path(&self, path: &Path) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM files_index WHERE path = ?1",
            params![path_str(path)],
        )?;
        Ok(rows > 0)
    }

    /// Remove the row at `prefix` and every row underneath it.
    ///
    /// Segment-exact: `/a/b` removes `/a/b` and `/a/b/...` but never `/a/bc`.
    /// Uses substr() rather than LIKE so `%`/`_` in real path names cannot
    /// widen the match.
    pub fn delete_by_path_prefix(&self, prefix: &Path) -> Result<usize> {
        let prefix = path_str(prefix);
        let with_sep = format!("{}{}", prefix, MAIN_SEPARATOR);
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM files_index
             WHERE path = ?1
                OR substr(path, 1, length(?2)) = ?2",
            params![prefix, with_sep],
        )?;
        Ok(rows)
    }

    /// Look up one row by its path.
    pub fn get_by_path(&self, path: &Path) -> Result<Option<FileRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT path, parent, name, type, extension, size, created_at, modified_at, hash
             FROM files_index WHERE path = ?1",
        )?;
        let result = stmt.query_row(params![path_str(path)], row_to_record);
        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(IndexError::Database(e)),
        }
    }

    /// Case-insensitive substring search over names, newest first.
    pub fn search(&self, term: &str, limit: usize) -> Result<Vec<FileRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT path, parent, name, type, extension, size, created_at, modified_at, hash
             FROM files_index
             WHERE LOWER(name) LIKE LOWER(?1)
             ORDER BY modified_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![format!("%{term}%"), limit as i64], row_to_record)?;
        let mut results = Vec::new();
        for r in rows {
            results.push(r?);
        }
        Ok(results)
    }

    /// Most recently modified files (directories excluded).
    pub fn recent(&self, limit: usize) -> Result<Vec<FileRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT path, parent, name, type, extension, size, created_at, modified_at, hash
             FROM files_index
             WHERE type = 'file'
             ORDER BY modified_at DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_record)?;
        let mut results = Vec::new();
        for r in rows {
            results.push(r?);
        }
        Ok(results)
    }

    /// Total row count.
    pub fn count(&self) -> Result<u64> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM files_index", [], |r| r.get(0))?;
        Ok(n as u64)
    }

    /// Execute an arbitrary statement against the index.
    ///
    /// SELECT statements return the full row set; INSERT/UPDATE/DELETE return
    /// a change summary; anything else is batch-executed. Errors are returned
    /// to the caller, never swallowed. A failing write statement has not
    /// committed anything (single statements are atomic in SQLite).
    pub fn query(&self, sql: &str, bind: &[Value]) -> Result<QueryOutput> {
        let conn = self.lock()?;
        let head = sql.trim_start().to_uppercase();

        if head.starts_with("SELECT") {
            let mut stmt = conn.prepare(sql).map_err(|e| statement_error(e, sql))?;
            let names: Vec<String> = stmt
                .column_names()
                .iter()
                .map(|n| n.to_string())
                .collect();
            let sql_params = bind_params(bind);
            let mut rows_out: Vec<Row> = Vec::new();
            let mut rows = stmt
                .query(rusqlite::params_from_iter(sql_params.iter()))
                .map_err(|e| statement_error(e, sql))?;
            while let Some(row) = rows.next().map_err(|e| statement_error(e, sql))? {
                let mut out = Row::new();
                for (i, name) in names.iter().enumerate() {
                    let v = row.get_ref(i).map_err(|e| statement_error(e, sql))?;
                    out.insert(name.clone(), value_ref_to_json(v));
                }
                rows_out.push(out);
            }
            tracing::debug!("[SQL] SELECT returned {} rows", rows_out.len());
            Ok(QueryOutput::Rows { rows: rows_out })
        } else if head.starts_with("INSERT") || head.starts_with("UPDATE") || head.starts_with("DELETE") {
            let sql_params = bind_params(bind);
            let changes = conn
                .execute(sql, rusqlite::params_from_iter(sql_params.iter()))
                .map_err(map_constraint)
                .map_err(|e| match e {
                    IndexError::Database(e) => statement_error(e, sql),
                    other => other,
                })?;
            let last_insert_rowid = conn.last_insert_rowid();
            tracing::debug!("[SQL] write statement changed {} rows", changes);
            Ok(QueryOutput::Changes {
                changes,
                last_insert_rowid,
            })
        } else {
            conn.execute_batch(sql).map_err(|e| statement_error(e, sql))?;
            Ok(QueryOutput::Done)
        }
    }

    /// Reclaim file space after large deletes.
    pub fn vacuum(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch("VACUUM")?;
        Ok(())
    }

    /// Drop and recreate the files_index table.
    pub fn reset(&self) -> Result<()> {
        let conn = self.lock()?;
        tracing::info!("[DB] Resetting files_index table");
        conn.execute_batch("DROP TABLE IF EXISTS files_index;")?;
        super::connection::create_schema(&conn)?;
        Ok(())
    }
}

fn run_upsert(conn: &Connection, record: &FileRecord) -> Result<()> {
    let mut stmt = conn.prepare_cached(UPSERT_SQL)?;
    stmt.execute(params![
        record.path,
        record.parent,
        record.name,
        record.kind.as_str(),
        record.extension,
        record.size as i64,
        record.created_at,
        record.modified_at,
        record.hash,
    ])
    .map_err(map_constraint)?;
    Ok(())
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecord> {
    let kind: String = row.get("type")?;
    Ok(FileRecord {
        path: row.get("path")?,
        parent: row.get("parent")?,
        name: row.get("name")?,
        kind: FileKind::parse(&kind),
        extension: row.get::<_, Option<String>>("extension")?.unwrap_or_default(),
        size: row.get::<_, i64>("size")? as u64,
        created_at: row.get("created_at")?,
        modified_at: row.get("modified_at")?,
        hash: row.get("hash")?,
    })
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn map_constraint(e: rusqlite::Error) -> IndexError {
    match &e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            IndexError::ConstraintViolation(e.to_string())
        }
        _ => IndexError::Database(e),
    }
}

fn statement_error(e: rusqlite::Error, sql: &str) -> IndexError {
    IndexError::Statement(format!("{e} (query: {sql})"))
}

/// JSON bind values to SQLite values. Arrays/objects are bound as their JSON
/// text, matching how callers hand structured parameters through.
fn bind_params(bind: &[Value]) -> Vec<rusqlite::types::Value> {
    bind.iter()
        .map(|v| match v {
            Value::Null => rusqlite::types::Value::Null,
            Value::Bool(b) => rusqlite::types::Value::Integer(*b as i64),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    rusqlite::types::Value::Integer(i)
                } else {
                    rusqlite::types::Value::Real(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => rusqlite::types::Value::Text(s.clone()),
            other => rusqlite::types::Value::Text(other.to_string()),
        })
        .collect()
}

fn value_ref_to_json(v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        // Blobs become byte arrays so shape classification treats them as
        // structured data, not scalars.
        ValueRef::Blob(b) => Value::Array(b.iter().map(|&x| Value::from(x)).collect()),
    }
}

/// Convenience used by the transfer operator and the scanner: stat `path`
/// and build its record, mapping IO failures into the error taxonomy.
pub fn record_from_disk(path: &Path) -> Result<FileRecord> {
    let meta = std::fs::metadata(path).map_err(|e| IndexError::from_io(e, path))?;
    Ok(FileRecord::from_metadata(path, &meta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FileKind;

    fn record(path: &str, kind: FileKind) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            parent: Path::new(path)
                .parent()
                .map(|p| p.to_string_lossy().into_owned()),
            name: Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            kind,
            extension: String::new(),
            size: 0,
            created_at: Some(1_000),
            modified_at: Some(2_000),
            hash: None,
        }
    }

    #[test]
    fn upsert_then_get_roundtrips_fields() {
        let store = IndexStore::open_in_memory().unwrap();
        let mut rec = record("/a/b/file.txt", FileKind::File);
        rec.extension = ".txt".into();
        rec.size = 42;
        store.upsert_many(std::slice::from_ref(&rec)).unwrap();

        let got = store.get_by_path(Path::new("/a/b/file.txt")).unwrap().unwrap();
        assert_eq!(got.path, rec.path);
        assert_eq!(got.parent.as_deref(), Some("/a/b"));
        assert_eq!(got.name, "file.txt");
        assert_eq!(got.kind, FileKind::File);
        assert_eq!(got.extension, ".txt");
        assert_eq!(got.size, 42);
        assert_eq!(got.created_at, Some(1_000));
        assert_eq!(got.modified_at, Some(2_000));
    }

    #[test]
    fn merge_keeps_created_at_when_incoming_is_none() {
        let store = IndexStore::open_in_memory().unwrap();
        let rec = record("/a/f", FileKind::File);
        store.upsert(&rec).unwrap();

        let mut second = rec.clone();
        second.created_at = None;
        second.modified_at = Some(3_000);
        second.size = 9;
        store.upsert(&second).unwrap();

        let got = store.get_by_path(Path::new("/a/f")).unwrap().unwrap();
        assert_eq!(got.created_at, Some(1_000));
        assert_eq!(got.modified_at, Some(3_000));
        assert_eq!(got.size, 9);
    }

    #[test]
    fn merge_overwrites_created_at_when_incoming_is_set() {
        let store = IndexStore::open_in_memory().unwrap();
        store.upsert(&record("/a/f", FileKind::File)).unwrap();

        let mut second = record("/a/f", FileKind::File);
        second.created_at = Some(7_777);
        store.upsert(&second).unwrap();

        let got = store.get_by_path(Path::new("/a/f")).unwrap().unwrap();
        assert_eq!(got.created_at, Some(7_777));
    }

    #[test]
    fn type_flips_on_reupsert() {
        let store = IndexStore::open_in_memory().unwrap();
        store.upsert(&record("/a/x", FileKind::File)).unwrap();
        store.upsert(&record("/a/x", FileKind::Directory)).unwrap();
        let got = store.get_by_path(Path::new("/a/x")).unwrap().unwrap();
        assert_eq!(got.kind, FileKind::Directory);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn prefix_delete_is_segment_exact() {
        let store = IndexStore::open_in_memory().unwrap();
        for p in ["/a/b", "/a/b/c", "/a/b/c/d", "/a/bc", "/a/bb/x"] {
            store.upsert(&record(p, FileKind::File)).unwrap();
        }
        let removed = store.delete_by_path_prefix(Path::new("/a/b")).unwrap();
        assert_eq!(removed, 3);
        assert!(store.get_by_path(Path::new("/a/b")).unwrap().is_none());
        assert!(store.get_by_path(Path::new("/a/b/c")).unwrap().is_none());
        assert!(store.get_by_path(Path::new("/a/b/c/d")).unwrap().is_none());
        assert!(store.get_by_path(Path::new("/a/bc")).unwrap().is_some());
        assert!(store.get_by_path(Path::new("/a/bb/x")).unwrap().is_some());
    }

    #[test]
    fn prefix_delete_ignores_like_metacharacters() {
        let store = IndexStore::open_in_memory().unwrap();
        store.upsert(&record("/a/b%c", FileKind::Directory)).unwrap();
        store.upsert(&record("/a/bXc", FileKind::Directory)).unwrap();
        store.upsert(&record("/a/b%c/inner", FileKind::File)).unwrap();

        let removed = store.delete_by_path_prefix(Path::new("/a/b%c")).unwrap();
        assert_eq!(removed, 2);
        assert!(store.get_by_path(Path::new("/a/bXc")).unwrap().is_some());
    }

    #[test]
    fn delete_by_path_removes_one_row() {
        let store = IndexStore::open_in_memory().unwrap();
        store.upsert(&record("/a/b", FileKind::Directory)).unwrap();
        store.upsert(&record("/a/b/c", FileKind::File)).unwrap();
        assert!(store.delete_by_path(Path::new("/a/b")).unwrap());
        assert!(!store.delete_by_path(Path::new("/a/b")).unwrap());
        assert!(store.get_by_path(Path::new("/a/b/c")).unwrap().is_some());
    }

    #[test]
    fn search_and_recent() {
        let store = IndexStore::open_in_memory().unwrap();
        let mut report = record("/docs/Report.txt", FileKind::File);
        report.modified_at = Some(5_000);
        store.upsert(&report).unwrap();
        let mut other = record("/docs/notes.md", FileKind::File);
        other.modified_at = Some(9_000);
        store.upsert(&other).unwrap();
        store.upsert(&record("/docs", FileKind::Directory)).unwrap();

        let hits = store.search("report", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "/docs/Report.txt");

        let recent = store.recent(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].path, "/docs/notes.md");
    }

    #[test]
    fn reset_clears_table_and_recreates_schema() {
        let store = IndexStore::open_in_memory().unwrap();
        store.upsert(&record("/keep", FileKind::File)).unwrap();
        store.reset().unwrap();
        assert_eq!(store.count().unwrap(), 0);
        store.upsert(&record("/keep", FileKind::File)).unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn raw_query_select_and_write() {
        let store = IndexStore::open_in_memory().unwrap();
        store.upsert(&record("/a/f", FileKind::File)).unwrap();

        let out = store
            .query("SELECT COUNT(*) AS count FROM files_index", &[])
            .unwrap();
        match out {
            QueryOutput::Rows { rows } => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0]["count"], serde_json::json!(1));
            }
            other => panic!("unexpected output: {other:?}"),
        }

        let out = store
            .query(
                "DELETE FROM files_index WHERE path = ?1",
                &[serde_json::json!("/a/f")],
            )
            .unwrap();
        match out {
            QueryOutput::Changes { changes, .. } => assert_eq!(changes, 1),
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[test]
    fn malformed_sql_is_a_statement_error() {
        let store = IndexStore::open_in_memory().unwrap();
        let err = store.query("SELECT FROM WHERE", &[]).unwrap_err();
        assert!(matches!(err, IndexError::Statement(_)));
    }
}
