// FILE: src/storage/mod.rs
pub mod connection;
pub mod store;

use std::path::Path;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

pub use connection::open_connection;
pub use store::IndexStore;

/// What kind of filesystem entry a row describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Directory,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::File => "file",
            FileKind::Directory => "directory",
        }
    }

    pub fn parse(s: &str) -> FileKind {
        if s == "directory" {
            FileKind::Directory
        } else {
            FileKind::File
        }
    }
}

/// One row of the files index.
///
/// `path` is the unique key. `parent` always holds the full parent directory
/// path. Timestamps are milliseconds since the Unix epoch; `created_at` may
/// be absent on filesystems that do not report a birth time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub parent: Option<String>,
    pub name: String,
    pub kind: FileKind,
    pub extension: String,
    pub size: u64,
    pub created_at: Option<i64>,
    pub modified_at: Option<i64>,
    /// Reserved for content dedup; never populated by the engine.
    pub hash: Option<String>,
}

impl FileRecord {
    /// Builds a record for `path` from stat metadata.
    ///
    /// Directories get size 0 and an empty extension; files get a lowercase,
    /// dot-prefixed extension.
    pub fn from_metadata(path: &Path, meta: &std::fs::Metadata) -> FileRecord {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        let is_dir = meta.is_dir();
        let extension = if is_dir {
            String::new()
        } else {
            path.extension()
                .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
                .unwrap_or_default()
        };

        FileRecord {
            path: path.to_string_lossy().into_owned(),
            parent: path.parent().map(|p| p.to_string_lossy().into_owned()),
            name,
            kind: if is_dir {
                FileKind::Directory
            } else {
                FileKind::File
            },
            extension,
            size: if is_dir { 0 } else { meta.len() },
            created_at: meta.created().ok().and_then(system_time_ms),
            modified_at: meta.modified().ok().and_then(system_time_ms),
            hash: None,
        }
    }
}

impl std::fmt::Display for FileRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}, size: {})", self.path, self.kind.as_str(), self.size)
    }
}

/// SystemTime to milliseconds since the Unix epoch.
pub fn system_time_ms(t: SystemTime) -> Option<i64> {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .ok()
        .map(|d| d.as_millis() as i64)
}
