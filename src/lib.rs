//! fsindex: a persistent, queryable mirror of a filesystem subtree.
//!
//! Three cooperating parts share one SQLite-backed [`IndexStore`]:
//! - the [`Scanner`] walks roots and streams FileRecord batches in,
//! - the [`TransferOperator`] performs create/copy/cut and reconciles the
//!   index with what actually landed on disk,
//! - the [`QuerySurface`] runs arbitrary SQL and classifies the raw result
//!   into UI-safe shapes.
//!
//! The index is eventually consistent with disk: it changes only through
//! explicit scans and engine-driven transfers, never by watching.

pub mod engine;
pub mod error;
pub mod storage;

pub use engine::{
    Engine, IgnorePolicy, NormalizedResult, QuerySurface, ScanSummary, Scanner, TransferOp,
    TransferOperator,
};
pub use error::{IndexError, Result};
pub use storage::{FileKind, FileRecord, IndexStore};
