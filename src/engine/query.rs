// FILE: src/engine/query.rs
//! Raw-SQL query surface and result normalization.
//!
//! The statement text is trusted (it comes from a caller-side translator)
//! and is never parsed here; classification works purely on the shape of the
//! returned rows. This is a hard boundary between SQL semantics and whatever
//! consumes the engine.

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::storage::store::{QueryOutput, Row};
use crate::storage::IndexStore;

/// Presentation category derived from a file's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Image,
    Pdf,
    Doc,
    Excel,
    Folder,
    Other,
}

/// Classify a lowercase, dot-stripped extension.
pub fn classify_extension(ext: &str) -> FileType {
    match ext {
        "jpg" | "jpeg" | "png" | "gif" | "bmp" | "webp" | "svg" | "heic" => FileType::Image,
        "pdf" => FileType::Pdf,
        "doc" | "docx" | "txt" | "md" | "rtf" | "odt" => FileType::Doc,
        "xls" | "xlsx" | "csv" | "ods" => FileType::Excel,
        _ => FileType::Other,
    }
}

/// One entry of a `files` result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedFile {
    pub id: String,
    pub name: String,
    pub path: String,
    pub parent: Option<String>,
    /// `file` or `folder`.
    #[serde(rename = "type")]
    pub kind: String,
    pub file_type: FileType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateRow {
    pub key: String,
    pub value: f64,
}

/// UI-safe classification of a raw result set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizedResult {
    /// Rows that look like index entries.
    Files { items: Vec<NormalizedFile> },
    /// Scalar or grouped aggregates; `metric == "unknown"` is the explicit
    /// fallback for row shapes that match no pattern.
    Aggregate {
        metric: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        field: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        rows: Option<Vec<AggregateRow>>,
    },
    /// A write statement: what changed.
    Mutation { changes: usize, last_insert_rowid: i64 },
}

impl NormalizedResult {
    /// True when shape classification fell through to the unknown aggregate.
    pub fn is_unclassified(&self) -> bool {
        matches!(self, NormalizedResult::Aggregate { metric, .. } if metric == "unknown")
    }
}

/// Executes arbitrary statements against the index and normalizes results.
pub struct QuerySurface {
    store: IndexStore,
}

impl QuerySurface {
    pub fn new(store: IndexStore) -> Self {
        Self { store }
    }

    pub fn run(&self, sql: &str, params: &[Value]) -> Result<NormalizedResult> {
        let result = match self.store.query(sql, params)? {
            QueryOutput::Rows { rows } => normalize_rows(rows),
            QueryOutput::Changes {
                changes,
                last_insert_rowid,
            } => NormalizedResult::Mutation {
                changes,
                last_insert_rowid,
            },
            QueryOutput::Done => NormalizedResult::Mutation {
                changes: 0,
                last_insert_rowid: 0,
            },
        };
        if result.is_unclassified() {
            tracing::debug!("[Query] Unclassified result shape for: {}", sql);
        }
        Ok(result)
    }
}

/// Classify a raw row set into `files` or `aggregate` shapes.
pub fn normalize_rows(rows: Vec<Row>) -> NormalizedResult {
    if rows.is_empty() {
        return NormalizedResult::Files { items: Vec::new() };
    }
    if is_aggregate_row(&rows[0]) {
        normalize_aggregate(rows)
    } else {
        normalize_files(rows)
    }
}

/// A row is an aggregate row iff it has neither a `path` nor a `name` column
/// and every value is a number or a string. Column names only; the SQL text
/// is never inspected.
fn is_aggregate_row(row: &Row) -> bool {
    if row.contains_key("path") || row.contains_key("name") {
        return false;
    }
    row.values()
        .all(|v| matches!(v, Value::Number(_) | Value::String(_)))
}

fn normalize_files(rows: Vec<Row>) -> NormalizedResult {
    let items = rows
        .into_iter()
        .map(|row| {
            let path = string_field(&row, "path");
            let name = string_field(&row, "name");
            let is_dir = row.get("type").and_then(Value::as_str) == Some("directory");
            let extension = row
                .get("extension")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            let file_type = if is_dir {
                FileType::Folder
            } else {
                classify_extension(
                    extension
                        .as_deref()
                        .unwrap_or("")
                        .trim_start_matches('.')
                        .to_lowercase()
                        .as_str(),
                )
            };
            NormalizedFile {
                id: if path.is_empty() { name.clone() } else { path.clone() },
                name,
                path,
                parent: row.get("parent").and_then(Value::as_str).map(str::to_string),
                kind: if is_dir { "folder".into() } else { "file".into() },
                file_type,
                extension,
                size: row.get("size").and_then(Value::as_u64),
                modified_at: row.get("modified_at").and_then(Value::as_i64),
            }
        })
        .collect();
    NormalizedResult::Files { items }
}

fn normalize_aggregate(rows: Vec<Row>) -> NormalizedResult {
    let keys: Vec<String> = rows[0].keys().cloned().collect();

    // Single-value aggregate (COUNT, SUM, AVG, ...)
    if rows.len() == 1 && keys.len() == 1 {
        let metric = keys[0].clone();
        let value = numeric(&rows[0][&metric]);
        return NormalizedResult::Aggregate {
            metric,
            field: None,
            value: Some(value),
            rows: None,
        };
    }

    // GROUP BY aggregate: (group key, value) pairs.
    if keys.len() == 2 {
        let group_key = keys[0].clone();
        let value_key = keys[1].clone();
        let pairs = rows
            .iter()
            .map(|r| AggregateRow {
                key: stringify(r.get(&group_key)),
                value: numeric(r.get(&value_key).unwrap_or(&Value::Null)),
            })
            .collect();
        return NormalizedResult::Aggregate {
            metric: value_key,
            field: Some(group_key),
            value: None,
            rows: Some(pairs),
        };
    }

    // Explicit fallback rather than dropping the rows on the floor.
    NormalizedResult::Aggregate {
        metric: "unknown".into(),
        field: None,
        value: None,
        rows: None,
    }
}

fn string_field(row: &Row, key: &str) -> String {
    row.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn stringify(v: Option<&Value>) -> String {
    match v {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn numeric(v: &Value) -> f64 {
    match v {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.parse().unwrap_or(0.0),
        _ => 0.0,
    }
}
