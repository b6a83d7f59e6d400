//! Directory traversal with ignore-rule pruning.
//!
//! Directories matched by the ignore set are pruned: their contents are
//! never visited, hashed or counted.

use crate::fs::ignore::IgnoreSet;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Follow symbolic links
    pub follow_links: bool,

    /// Exclusion rules
    pub ignore: IgnoreSet,
}

impl WalkOptions {
    pub fn with_ignore(ignore: IgnoreSet) -> Self {
        Self {
            ignore,
            ..Self::default()
        }
    }
}

/// Information about a non-directory entry discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the file
    pub path: PathBuf,

    /// Size in bytes (of the link itself for unfollowed symlinks)
    pub size: u64,
}

/// Walk `root`, yielding every entry that survives the ignore rules.
///
/// The root itself is always yielded first. Errors are passed through so
/// callers can decide whether an unreadable entry is fatal.
pub fn walk<'a>(
    root: &Path,
    options: &'a WalkOptions,
) -> impl Iterator<Item = walkdir::Result<DirEntry>> + 'a {
    WalkDir::new(root)
        .follow_links(options.follow_links)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |entry| entry.depth() == 0 || !options.ignore.is_ignored(entry.path()))
}

/// Walk a directory tree with a callback for each non-directory entry.
///
/// Unreadable entries are skipped. Returns the number of skipped entries.
pub fn walk_directory_with_callback<F>(root: &Path, options: &WalkOptions, mut callback: F) -> usize
where
    F: FnMut(&FileInfo),
{
    let mut skipped = 0;

    for entry in walk(root, options) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unreadable entry");
                skipped += 1;
                continue;
            }
        };

        if entry.file_type().is_dir() {
            continue;
        }

        let size = match entry.metadata() {
            Ok(metadata) => metadata.len(),
            Err(_) => {
                skipped += 1;
                continue;
            }
        };

        callback(&FileInfo {
            path: entry.path().to_path_buf(),
            size,
        });
    }

    skipped
}

/// Count files (symlinks included) and their total size under `root`,
/// skipping anything matched by `excludes`. Used for pre-flight estimates.
pub fn walk_stats<S: AsRef<str>>(root: &Path, excludes: &[S]) -> (usize, u64) {
    let options = WalkOptions::with_ignore(IgnoreSet::with_root(excludes, root));
    let mut files = 0usize;
    let mut total_size = 0u64;

    walk_directory_with_callback(root, &options, |file| {
        files += 1;
        total_size += file.size;
    });

    (files, total_size)
}
