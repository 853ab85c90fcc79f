//! Error types for fsindex

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(PathBuf),

    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    #[error("Cross-device fallback failed moving {source_path} to {dest}: {cause}")]
    CrossDeviceFallbackFailed {
        source_path: PathBuf,
        dest: PathBuf,
        cause: std::io::Error,
    },

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Statement error: {0}")]
    Statement(String),

    /// The filesystem operation succeeded but the index was not updated.
    /// The destination subtree needs a corrective rescan.
    #[error("Index reconciliation failed for {dest}: {cause}")]
    ReconcileFailed {
        dest: PathBuf,
        #[source]
        cause: Box<IndexError>,
    },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("State error: {0}")]
    State(String),
}

impl IndexError {
    /// Maps an IO error on `path` to the taxonomy variant it belongs to.
    pub fn from_io(err: std::io::Error, path: &std::path::Path) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => IndexError::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => {
                IndexError::PermissionDenied(path.to_path_buf())
            }
            _ => IndexError::Io(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;
