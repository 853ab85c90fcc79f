// FILE: src/engine/scanner.rs
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{IndexError, Result};
use crate::storage::{FileRecord, IndexStore};

/// Records buffered in memory before each `upsert_many` flush.
const BATCH_SIZE: usize = 400;

/// Directories never descended into, on top of the hidden-name rule.
const DENY_DIRS: &[&str] = &[
    ".cache",
    ".local",
    ".npm",
    ".cargo",
    ".rustup",
    ".var",
    ".config",
    ".mozilla",
    "node_modules",
    ".git",
    "__pycache__",
    ".vscode",
];

/// When the scanned root is the home directory itself, only these first-level
/// folders are descended into. Everything else at that level is still indexed
/// as a directory row, just not walked.
const HOME_ALLOW_DIRS: &[&str] = &[
    "Documents",
    "Downloads",
    "Desktop",
    "Pictures",
    "Videos",
    "Music",
];

/// Which entries a scan skips and where home-restricted recursion applies.
#[derive(Clone)]
pub struct IgnorePolicy {
    deny: HashSet<String>,
    home_allow: HashSet<String>,
    home: Option<PathBuf>,
}

impl Default for IgnorePolicy {
    fn default() -> Self {
        Self {
            deny: DENY_DIRS.iter().map(|s| s.to_string()).collect(),
            home_allow: HOME_ALLOW_DIRS.iter().map(|s| s.to_string()).collect(),
            home: dirs::home_dir(),
        }
    }
}

impl IgnorePolicy {
    /// Policy that treats `home` as the home directory. Used by tests and by
    /// callers that override OS detection.
    pub fn with_home(home: Option<PathBuf>) -> Self {
        Self {
            home,
            ..Self::default()
        }
    }

    fn is_ignored(&self, name: &str) -> bool {
        name.starts_with('.') || self.deny.contains(name)
    }

    fn is_home_root(&self, root: &Path) -> bool {
        self.home.as_deref() == Some(root)
    }

    fn allowed_under_home(&self, name: &str) -> bool {
        self.home_allow.contains(name)
    }
}

/// What a completed scan did. `skipped` counts entries dropped because a
/// stat or directory listing failed; nothing else is recorded about them.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ScanSummary {
    pub files: u64,
    pub dirs: u64,
    pub skipped: u64,
    pub records: u64,
}

/// Walks one root at a time and streams FileRecord batches into the store.
///
/// Scans only ever add or refresh rows; a path the scan no longer observes is
/// left in place (scans may be root-scoped or partial).
pub struct Scanner {
    store: IndexStore,
    policy: IgnorePolicy,
}

impl Scanner {
    pub fn new(store: IndexStore) -> Self {
        Self {
            store,
            policy: IgnorePolicy::default(),
        }
    }

    pub fn with_policy(store: IndexStore, policy: IgnorePolicy) -> Self {
        Self { store, policy }
    }

    /// Scan `root` and index everything the policy admits.
    ///
    /// The walk itself is blocking IO and runs on the blocking pool. Multiple
    /// roots may be scanned concurrently; the store serializes batches.
    pub async fn scan(&self, root: impl AsRef<Path>) -> Result<ScanSummary> {
        let store = self.store.clone();
        let policy = self.policy.clone();
        let root = std::path::absolute(root.as_ref()).map_err(IndexError::Io)?;

        tokio::task::spawn_blocking(move || scan_blocking(&store, &policy, &root))
            .await
            .map_err(|_| IndexError::State("Scan task panicked".into()))?
    }
}

fn scan_blocking(store: &IndexStore, policy: &IgnorePolicy, root: &Path) -> Result<ScanSummary> {
    // The root must exist; everything below it is best-effort.
    fs::metadata(root).map_err(|e| IndexError::from_io(e, root))?;

    tracing::info!("[Scanner] Scanning root: {}", root.display());

    let restrict_first_level = policy.is_home_root(root);
    let mut summary = ScanSummary::default();
    let mut batch: Vec<FileRecord> = Vec::with_capacity(BATCH_SIZE);

    // Explicit work stack; pathological depth must not exhaust the call stack.
    let mut stack: Vec<(PathBuf, usize)> = vec![(root.to_path_buf(), 0)];

    while let Some((dir, depth)) = stack.pop() {
        match fs::metadata(&dir) {
            Ok(meta) => {
                batch.push(FileRecord::from_metadata(&dir, &meta));
                summary.dirs += 1;
            }
            Err(_) => {
                summary.skipped += 1;
                continue;
            }
        }

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => {
                // Permission denied or vanished; siblings keep going.
                summary.skipped += 1;
                flush_if_full(store, &mut batch, &mut summary)?;
                continue;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => {
                    summary.skipped += 1;
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if policy.is_ignored(&name) {
                continue;
            }

            let file_type = match entry.file_type() {
                Ok(t) => t,
                Err(_) => {
                    summary.skipped += 1;
                    continue;
                }
            };
            // Symlinks are not followed: indexing the target subtree under
            // the link path would duplicate it, and a link cycle would keep
            // the walk alive forever. Policy skip, not a stat failure.
            if file_type.is_symlink() {
                continue;
            }

            let path = entry.path();
            let meta = match fs::metadata(&path) {
                Ok(m) => m,
                Err(_) => {
                    summary.skipped += 1;
                    continue;
                }
            };

            if file_type.is_dir() {
                if depth == 0 && restrict_first_level && !policy.allowed_under_home(&name) {
                    // Indexed but not descended into.
                    batch.push(FileRecord::from_metadata(&path, &meta));
                    summary.dirs += 1;
                } else {
                    stack.push((path, depth + 1));
                }
            } else if file_type.is_file() {
                batch.push(FileRecord::from_metadata(&path, &meta));
                summary.files += 1;
            }

            flush_if_full(store, &mut batch, &mut summary)?;
        }
    }

    if !batch.is_empty() {
        summary.records += batch.len() as u64;
        store.upsert_many(&batch)?;
    }

    tracing::info!(
        "[Scanner] Done: {} files, {} dirs, {} skipped ({})",
        summary.files,
        summary.dirs,
        summary.skipped,
        root.display()
    );
    Ok(summary)
}

fn flush_if_full(
    store: &IndexStore,
    batch: &mut Vec<FileRecord>,
    summary: &mut ScanSummary,
) -> Result<()> {
    if batch.len() >= BATCH_SIZE {
        summary.records += batch.len() as u64;
        store.upsert_many(batch)?;
        batch.clear();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FileKind;
    use std::fs::File;
    use std::io::Write as _;

    fn write_file(path: &Path, contents: &str) {
        let mut f = File::create(path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[tokio::test]
    async fn scan_indexes_every_visible_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir(root.join("sub")).unwrap();
        std::fs::create_dir(root.join("sub/deeper")).unwrap();
        write_file(&root.join("a.txt"), "a");
        write_file(&root.join("sub/b.rs"), "b");
        write_file(&root.join("sub/deeper/c"), "c");
        // Ignored entries
        write_file(&root.join(".hidden"), "x");
        std::fs::create_dir(root.join("node_modules")).unwrap();
        write_file(&root.join("node_modules/dep.js"), "x");

        let store = IndexStore::open_in_memory().unwrap();
        let scanner = Scanner::with_policy(store.clone(), IgnorePolicy::with_home(None));
        let summary = scanner.scan(root).await.unwrap();

        // 3 dirs (root, sub, deeper) + 3 files
        assert_eq!(summary.dirs, 3);
        assert_eq!(summary.files, 3);
        assert_eq!(store.count().unwrap(), 6);

        let rec = store
            .get_by_path(&std::path::absolute(root.join("sub")).unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(rec.kind, FileKind::Directory);
        assert_eq!(rec.size, 0);
        assert_eq!(rec.extension, "");

        let rec = store
            .get_by_path(&std::path::absolute(root.join("a.txt")).unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(rec.kind, FileKind::File);
        assert_eq!(rec.extension, ".txt");
        assert_eq!(rec.size, 1);
    }

    #[tokio::test]
    async fn home_root_limits_first_level_recursion() {
        let tmp = tempfile::tempdir().unwrap();
        let root = std::path::absolute(tmp.path()).unwrap();
        std::fs::create_dir(root.join("Documents")).unwrap();
        write_file(&root.join("Documents/notes.txt"), "n");
        std::fs::create_dir(root.join("Projects")).unwrap();
        write_file(&root.join("Projects/secret.txt"), "s");

        let store = IndexStore::open_in_memory().unwrap();
        let policy = IgnorePolicy::with_home(Some(root.clone()));
        let scanner = Scanner::with_policy(store.clone(), policy);
        scanner.scan(&root).await.unwrap();

        // Projects is indexed as a directory but not walked.
        assert!(store.get_by_path(&root.join("Projects")).unwrap().is_some());
        assert!(store
            .get_by_path(&root.join("Projects/secret.txt"))
            .unwrap()
            .is_none());
        assert!(store
            .get_by_path(&root.join("Documents/notes.txt"))
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn rescan_refreshes_without_deleting() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write_file(&root.join("keep.txt"), "k");
        write_file(&root.join("gone.txt"), "g");

        let store = IndexStore::open_in_memory().unwrap();
        let scanner = Scanner::with_policy(store.clone(), IgnorePolicy::with_home(None));
        scanner.scan(root).await.unwrap();
        assert_eq!(store.count().unwrap(), 3);

        std::fs::remove_file(root.join("gone.txt")).unwrap();
        scanner.scan(root).await.unwrap();

        // The stale row stays until a transfer touches it or the row is
        // explicitly removed; scans never delete.
        assert_eq!(store.count().unwrap(), 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinks_are_skipped_and_cycles_terminate() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        let real = root.join("real");
        std::fs::create_dir(&real).unwrap();
        write_file(&real.join("f.txt"), "f");
        std::os::unix::fs::symlink(&real, root.join("link")).unwrap();
        // A cycle back to the root itself.
        std::os::unix::fs::symlink(root, real.join("loop")).unwrap();

        let store = IndexStore::open_in_memory().unwrap();
        let scanner = Scanner::with_policy(store.clone(), IgnorePolicy::with_home(None));
        let summary = scanner.scan(root).await.unwrap();

        // root + real + f.txt only; neither link is indexed or followed.
        assert_eq!(summary.dirs, 2);
        assert_eq!(summary.files, 1);
        assert_eq!(store.count().unwrap(), 3);
        assert!(store
            .get_by_path(&std::path::absolute(root.join("link")).unwrap())
            .unwrap()
            .is_none());
        assert!(store
            .get_by_path(&std::path::absolute(root.join("link/f.txt")).unwrap())
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn scan_of_missing_root_fails() {
        let store = IndexStore::open_in_memory().unwrap();
        let scanner = Scanner::new(store);
        let err = scanner.scan("/definitely/not/a/real/root").await.unwrap_err();
        assert!(matches!(err, IndexError::NotFound(_)));
    }
}
