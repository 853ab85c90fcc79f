// FILE: src/engine/transfer.rs
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::{IndexError, Result};
use crate::storage::{FileRecord, IndexStore};

/// Whether a transfer leaves the source behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferOp {
    Copy,
    Cut,
}

/// Subtree-granular mutual exclusion for transfers.
///
/// An operation is admitted only when none of its roots is equal to, an
/// ancestor of, or a descendant of a root already in flight. Waiters park on
/// a Notify and re-check when any guard drops.
#[derive(Default)]
pub(crate) struct PathLocks {
    active: Mutex<HashSet<PathBuf>>,
    notify: tokio::sync::Notify,
}

impl PathLocks {
    pub(crate) async fn acquire(self: &Arc<Self>, roots: Vec<PathBuf>) -> PathLockGuard {
        loop {
            // Register interest before checking, so a release between the
            // check and the await cannot be missed.
            let notified = self.notify.notified();
            {
                let mut active = self
                    .active
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                let overlaps = active.iter().any(|held| {
                    roots
                        .iter()
                        .any(|r| r.starts_with(held) || held.starts_with(r))
                });
                if !overlaps {
                    for r in &roots {
                        active.insert(r.clone());
                    }
                    return PathLockGuard {
                        locks: Arc::clone(self),
                        roots,
                    };
                }
            }
            notified.await;
        }
    }
}

pub(crate) struct PathLockGuard {
    locks: Arc<PathLocks>,
    roots: Vec<PathBuf>,
}

impl Drop for PathLockGuard {
    fn drop(&mut self) {
        let mut active = self
            .locks
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for r in &self.roots {
            active.remove(r);
        }
        drop(active);
        self.locks.notify.notify_waiters();
    }
}

/// Performs filesystem mutations and keeps the index reconciled with them.
///
/// Every operation either leaves filesystem and index jointly consistent or
/// fails with enough detail to tell "nothing happened" apart from
/// "filesystem changed, index needs a rescan" ([`IndexError::ReconcileFailed`]).
pub struct TransferOperator {
    store: IndexStore,
    locks: Arc<PathLocks>,
}

impl TransferOperator {
    pub fn new(store: IndexStore) -> Self {
        Self {
            store,
            locks: Arc::new(PathLocks::default()),
        }
    }

    /// Create a directory (and any missing ancestors) and index it.
    /// Idempotent: an existing directory just gets its row refreshed.
    pub async fn create_folder(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = std::path::absolute(path.as_ref()).map_err(IndexError::Io)?;
        let _guard = self.locks.acquire(vec![path.clone()]).await;

        let already_dir = matches!(tokio::fs::metadata(&path).await, Ok(m) if m.is_dir());
        if !already_dir {
            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|e| IndexError::from_io(e, &path))?;
        }

        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| IndexError::from_io(e, &path))?;
        self.store.upsert(&FileRecord::from_metadata(&path, &meta))?;

        tracing::info!("[Transfer] Created folder: {}", path.display());
        Ok(path)
    }

    /// Copy or move `source` to `destination` and reconcile the index.
    ///
    /// If `destination` exists and is a directory the effective target is
    /// `destination/basename(source)`; otherwise `destination` is the exact
    /// target path. Returns the final destination path.
    pub async fn transfer(
        &self,
        source: impl AsRef<Path>,
        destination: impl AsRef<Path>,
        op: TransferOp,
    ) -> Result<PathBuf> {
        let src = std::path::absolute(source.as_ref()).map_err(IndexError::Io)?;
        let dest_base = std::path::absolute(destination.as_ref()).map_err(IndexError::Io)?;
        let _guard = self
            .locks
            .acquire(vec![src.clone(), dest_base.clone()])
            .await;

        let src_meta = tokio::fs::metadata(&src)
            .await
            .map_err(|e| IndexError::from_io(e, &src))?;
        let is_dir = src_meta.is_dir();

        // Dropping into an existing directory vs. exact rename target.
        let dest = match tokio::fs::metadata(&dest_base).await {
            Ok(m) if m.is_dir() => {
                let base = src.file_name().ok_or_else(|| {
                    IndexError::InvalidPath(format!("source has no basename: {}", src.display()))
                })?;
                dest_base.join(base)
            }
            _ => dest_base,
        };

        // Copying a file onto itself would truncate it before reading; a
        // self-rename plus the cut cleanup would drop a live row. Refuse both
        // before any filesystem call.
        if dest == src {
            return Err(IndexError::InvalidPath(format!(
                "source and destination are the same path: {}",
                src.display()
            )));
        }

        if is_dir && dest.starts_with(&src) {
            return Err(IndexError::InvalidPath(format!(
                "destination {} is inside source {}",
                dest.display(),
                src.display()
            )));
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| IndexError::from_io(e, parent))?;
        }

        match op {
            TransferOp::Copy => {
                if is_dir {
                    copy_tree(&src, &dest)
                        .await
                        .map_err(|e| IndexError::from_io(e, &src))?;
                } else {
                    tokio::fs::copy(&src, &dest)
                        .await
                        .map_err(|e| IndexError::from_io(e, &src))?;
                }
            }
            TransferOp::Cut => match tokio::fs::rename(&src, &dest).await {
                Ok(()) => {}
                Err(e) if is_cross_device(&e) => {
                    self.cross_device_move(&src, &dest, is_dir).await?;
                }
                Err(e) => return Err(IndexError::from_io(e, &src)),
            },
        }

        // The filesystem op is done; from here on, failure means the index is
        // behind and the caller needs a corrective rescan of `dest`.
        self.reconcile(&src, &dest, is_dir, op)
            .await
            .map_err(|cause| IndexError::ReconcileFailed {
                dest: dest.clone(),
                cause: Box::new(cause),
            })?;

        tracing::info!(
            "[Transfer] {:?} {} -> {}",
            op,
            src.display(),
            dest.display()
        );
        Ok(dest)
    }

    /// Rename was rejected with EXDEV: copy everything to the destination
    /// first, and only after the copy is fully complete delete the source.
    /// A copy failure leaves the source untouched.
    async fn cross_device_move(&self, src: &Path, dest: &Path, is_dir: bool) -> Result<()> {
        tracing::debug!(
            "[Transfer] Cross-device rename, falling back to copy+delete: {}",
            src.display()
        );

        let copied = if is_dir {
            copy_tree(src, dest).await
        } else {
            tokio::fs::copy(src, dest).await.map(|_| ())
        };
        if let Err(cause) = copied {
            return Err(IndexError::CrossDeviceFallbackFailed {
                source_path: src.to_path_buf(),
                dest: dest.to_path_buf(),
                cause,
            });
        }

        if is_dir {
            tokio::fs::remove_dir_all(src).await
        } else {
            tokio::fs::remove_file(src).await
        }
        .map_err(|e| IndexError::from_io(e, src))?;
        Ok(())
    }

    /// Bring the index in line with what is now on disk at `dest`.
    ///
    /// Directory contents are enumerated from the destination subtree, never
    /// the old source: after a cut+fallback the source no longer exists.
    async fn reconcile(&self, src: &Path, dest: &Path, is_dir: bool, op: TransferOp) -> Result<()> {
        if is_dir {
            let root = dest.to_path_buf();
            let records = tokio::task::spawn_blocking(move || collect_tree(&root))
                .await
                .map_err(|_| IndexError::State("Reconcile task panicked".into()))??;
            self.store.upsert_many(&records)?;
        } else {
            let meta = tokio::fs::metadata(dest)
                .await
                .map_err(|e| IndexError::from_io(e, dest))?;
            self.store.upsert(&FileRecord::from_metadata(dest, &meta))?;
        }

        if op == TransferOp::Cut {
            self.store.delete_by_path_prefix(src)?;
        }
        Ok(())
    }
}

fn is_cross_device(e: &io::Error) -> bool {
    #[cfg(unix)]
    {
        e.raw_os_error() == Some(libc::EXDEV)
    }
    #[cfg(not(unix))]
    {
        // ERROR_NOT_SAME_DEVICE
        e.raw_os_error() == Some(17)
    }
}

/// Fresh records for `root` and every descendant, from stat of each entry.
fn collect_tree(root: &Path) -> Result<Vec<FileRecord>> {
    let mut records = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(io::Error::from).map_err(IndexError::Io)?;
        let meta = entry.metadata().map_err(io::Error::from).map_err(IndexError::Io)?;
        records.push(FileRecord::from_metadata(entry.path(), &meta));
    }
    Ok(records)
}

async fn copy_tree(src: &Path, dest: &Path) -> io::Result<()> {
    let src = src.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || copy_tree_blocking(&src, &dest))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "copy task panicked"))?
}

fn copy_tree_blocking(src: &Path, dest: &Path) -> io::Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .unwrap_or_else(|_| Path::new(""));
        let target = dest.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if file_type.is_file() {
            std::fs::copy(entry.path(), &target)?;
        }
        // Symlinks are not carried over.
    }
    Ok(())
}
