//! Registry of in-flight temporary paths.
//!
//! A temporary is registered before anything is created at its path and
//! unregistered exactly when it becomes final (after a successful commit).
//! Whatever is still registered when the run ends, fails or is cancelled is
//! removed by [`CleanupRegistry::cleanup`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
}

/// Shared by the pipeline and the signal handler; all methods take `&self`.
#[derive(Debug, Default)]
pub struct CleanupRegistry {
    entries: Mutex<Vec<CleanupEntry>>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_file(&self, path: impl Into<PathBuf>) {
        self.register(path.into(), EntryKind::File);
    }

    pub fn register_dir(&self, path: impl Into<PathBuf>) {
        self.register(path.into(), EntryKind::Directory);
    }

    fn register(&self, path: PathBuf, kind: EntryKind) {
        debug!(path = %path.display(), ?kind, "Registered temporary");
        let mut entries = self.lock();
        if !entries.iter().any(|e| e.path == path) {
            entries.push(CleanupEntry { path, kind });
        }
    }

    /// Forget `path` without touching it. Returns whether it was registered.
    pub fn unregister(&self, path: &Path) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|e| e.path != path);
        before != entries.len()
    }

    /// Remove `path` now, whether or not it is still registered, and forget
    /// it. Used on a failed transaction. If removal fails the path stays
    /// registered for the final sweep.
    pub fn discard(&self, path: &Path) {
        let registered = {
            let mut entries = self.lock();
            let position = entries.iter().position(|e| e.path == path);
            position.map(|i| entries.remove(i))
        };
        let entry = match registered {
            Some(entry) => entry,
            None => match fs::symlink_metadata(path) {
                Ok(metadata) => CleanupEntry {
                    path: path.to_path_buf(),
                    kind: if metadata.is_dir() { EntryKind::Directory } else { EntryKind::File },
                },
                Err(_) => return,
            },
        };

        if let Err(e) = remove_entry(&entry) {
            warn!(path = %entry.path.display(), error = %e, "Failed to remove temporary, keeping it for the final sweep");
            self.register(entry.path, entry.kind);
        }
    }

    /// Forget a temporary whose commit succeeded. A path the commit left
    /// behind (a cross-device copy whose source could not be removed) stays
    /// registered so the sweep retries it.
    pub fn release(&self, path: &Path) -> bool {
        if fs::symlink_metadata(path).is_ok() {
            warn!(path = %path.display(), "Committed temporary still present, leaving it for the sweep");
            return false;
        }
        self.unregister(path)
    }

    /// Remove every registered temporary. Best effort: failures are logged
    /// and the entry stays registered so a later sweep retries it. Returns
    /// the number of entries removed.
    pub fn cleanup(&self) -> usize {
        let drained: Vec<CleanupEntry> = std::mem::take(&mut *self.lock());
        let mut removed = 0;
        let mut failed = Vec::new();

        for entry in drained.into_iter().rev() {
            match remove_entry(&entry) {
                Ok(()) => {
                    removed += 1;
                    debug!(path = %entry.path.display(), "Removed temporary");
                }
                Err(e) => {
                    warn!(path = %entry.path.display(), error = %e, "Failed to remove temporary");
                    failed.push(entry);
                }
            }
        }

        if !failed.is_empty() {
            let mut entries = self.lock();
            for entry in failed.into_iter().rev() {
                if !entries.iter().any(|e| e.path == entry.path) {
                    entries.push(entry);
                }
            }
        }

        removed
    }

    pub fn pending(&self) -> Vec<CleanupEntry> {
        self.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A panic while holding the lock must not prevent the final sweep.
    fn lock(&self) -> MutexGuard<'_, Vec<CleanupEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for CleanupRegistry {
    fn drop(&mut self) {
        if !self.is_empty() {
            self.cleanup();
        }
    }
}

fn remove_entry(entry: &CleanupEntry) -> io::Result<()> {
    let result = match entry.kind {
        EntryKind::Directory => fs::remove_dir_all(&entry.path),
        EntryKind::File => fs::remove_file(&entry.path),
    };
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
