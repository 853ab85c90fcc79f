// FILE: src/engine/mod.rs
pub mod query;
pub mod scanner;
pub mod transfer;

use std::path::{Path, PathBuf};

pub use query::{NormalizedResult, QuerySurface};
pub use scanner::{IgnorePolicy, ScanSummary, Scanner};
pub use transfer::{TransferOp, TransferOperator};

use crate::error::Result;
use crate::storage::IndexStore;

/// The engine facade: one store, shared by the scanner, the transfer
/// operator, and the query surface. This is the whole outbound contract;
/// orchestrators decide *when* to scan, move, or query.
pub struct Engine {
    store: IndexStore,
    scanner: Scanner,
    transfer: TransferOperator,
    query: QuerySurface,
}

impl Engine {
    pub fn open(db_path: &Path) -> Result<Self> {
        Ok(Self::from_store(IndexStore::open(db_path)?))
    }

    /// Fully in-memory engine; used by tests.
    pub fn in_memory() -> Result<Self> {
        Ok(Self::from_store(IndexStore::open_in_memory()?))
    }

    fn from_store(store: IndexStore) -> Self {
        Self {
            scanner: Scanner::new(store.clone()),
            transfer: TransferOperator::new(store.clone()),
            query: QuerySurface::new(store.clone()),
            store,
        }
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    pub async fn scan(&self, root: impl AsRef<Path>) -> Result<ScanSummary> {
        self.scanner.scan(root).await
    }

    pub async fn create_folder(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        self.transfer.create_folder(path).await
    }

    pub async fn transfer(
        &self,
        source: impl AsRef<Path>,
        destination: impl AsRef<Path>,
        op: TransferOp,
    ) -> Result<PathBuf> {
        self.transfer.transfer(source, destination, op).await
    }

    pub fn query(&self, sql: &str, params: &[serde_json::Value]) -> Result<NormalizedResult> {
        self.query.run(sql, params)
    }
}
