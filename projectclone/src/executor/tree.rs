//! Atomic directory-tree copy.
//!
//! The tree is built inside a hidden temporary sibling under the destination
//! root and committed with a single [`atomic_move`](super::atomic::atomic_move).
//! Per-file failures are recorded in the [`CopyReport`] and the file is left
//! out; only commit-level failures abort the transaction.

use super::atomic::{atomic_move_with, copy_file_preserving, Renamer, StdRenamer};
use crate::fs::ignore::{normalize, IgnoreSet};
use crate::fs::permissions::safe_symlink_create;
use crate::fs::walker::{walk, walk_directory_with_callback, WalkOptions};
use crate::lifecycle::RunContext;
use crate::transfer::progress::ProgressTracker;
use crate::utils::hash::sha256_of_file;
use crate::utils::naming::{make_unique_path, temp_sibling};
use crate::{Result, VaultError};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Plain listing of copied relative paths
pub const MANIFEST_FILE: &str = "MANIFEST.txt";

/// `<sha256>  <relative path>` per copied regular file
pub const MANIFEST_SHA_FILE: &str = "MANIFEST_SHA256.txt";

#[derive(Debug, Clone, Default)]
pub struct CopyOptions {
    /// Patterns excluded from the copy, relative to the source
    pub excludes: Vec<String>,

    /// Write [`MANIFEST_FILE`]
    pub manifest: bool,

    /// Write [`MANIFEST_SHA_FILE`]
    pub manifest_sha: bool,

    /// Copy symlinks as symlinks instead of following them
    pub preserve_symlinks: bool,

    /// Log progress while copying
    pub show_progress: bool,
}

/// A file left out of the copy and why.
#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct CopyReport {
    pub final_path: PathBuf,
    pub files_copied: usize,
    pub bytes_copied: u64,
    pub skipped: Vec<SkippedFile>,
}

#[derive(Default)]
struct CopyState {
    files_copied: usize,
    bytes_copied: u64,
    listing: Vec<String>,
    checksums: Vec<(String, String)>,
    skipped: Vec<SkippedFile>,
}

impl CopyState {
    fn skip(&mut self, path: &Path, reason: impl ToString) {
        let reason = reason.to_string();
        warn!(path = %path.display(), reason = %reason, "Skipping file");
        self.skipped.push(SkippedFile {
            path: path.to_path_buf(),
            reason,
        });
    }
}

/// Copy `source` into `dest_root/name` (or `name-<n>` when taken).
pub fn copy_tree_atomic(
    source: &Path,
    dest_root: &Path,
    name: &str,
    options: &CopyOptions,
    ctx: &RunContext,
) -> Result<CopyReport> {
    copy_tree_atomic_with(&StdRenamer, source, dest_root, name, options, ctx)
}

pub fn copy_tree_atomic_with(
    renamer: &dyn Renamer,
    source: &Path,
    dest_root: &Path,
    name: &str,
    options: &CopyOptions,
    ctx: &RunContext,
) -> Result<CopyReport> {
    fs::create_dir_all(dest_root).map_err(|e| VaultError::commit(dest_root, e))?;

    let tmp = temp_sibling(dest_root, name);
    ctx.registry.register_dir(&tmp);

    let result = build_and_commit(renamer, source, dest_root, name, &tmp, options, ctx);
    if result.is_err() {
        ctx.registry.discard(&tmp);
    }
    result
}

fn build_and_commit(
    renamer: &dyn Renamer,
    source: &Path,
    dest_root: &Path,
    name: &str,
    tmp: &Path,
    options: &CopyOptions,
    ctx: &RunContext,
) -> Result<CopyReport> {
    fs::create_dir(tmp).map_err(|e| VaultError::commit(tmp, e))?;

    let state = copy_entries(source, tmp, options, ctx)?;

    if options.manifest {
        let mut body = String::new();
        for rel in &state.listing {
            body.push_str(rel);
            body.push('\n');
        }
        write_sidecar(&tmp.join(MANIFEST_FILE), &body)?;
    }
    if options.manifest_sha {
        let mut body = String::new();
        for (hash, rel) in &state.checksums {
            body.push_str(&format!("{hash}  {rel}\n"));
        }
        write_sidecar(&tmp.join(MANIFEST_SHA_FILE), &body)?;
    }

    ctx.check_cancelled()?;

    let final_path = make_unique_path(&dest_root.join(name));
    atomic_move_with(renamer, tmp, &final_path, Some(ctx.registry.as_ref()))?;
    ctx.registry.release(tmp);

    info!(
        path = %final_path.display(),
        files = state.files_copied,
        bytes = state.bytes_copied,
        skipped = state.skipped.len(),
        "Tree copy committed"
    );

    Ok(CopyReport {
        final_path,
        files_copied: state.files_copied,
        bytes_copied: state.bytes_copied,
        skipped: state.skipped,
    })
}

fn copy_entries(
    source: &Path,
    tmp: &Path,
    options: &CopyOptions,
    ctx: &RunContext,
) -> Result<CopyState> {
    let walk_options = WalkOptions {
        follow_links: !options.preserve_symlinks,
        ignore: IgnoreSet::with_root(&options.excludes, source),
    };

    let mut progress = if options.show_progress {
        let mut files = 0usize;
        let mut bytes = 0u64;
        walk_directory_with_callback(source, &walk_options, |f| {
            files += 1;
            bytes += f.size;
        });
        Some(ProgressTracker::new(bytes, files))
    } else {
        None
    };

    let mut state = CopyState::default();

    for entry in walk(source, &walk_options) {
        ctx.check_cancelled()?;

        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| source.to_path_buf());
                state.skip(&path, e);
                continue;
            }
        };
        if entry.depth() == 0 {
            continue;
        }

        let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
        let rel = normalize(relative);
        let dst = tmp.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            if let Err(e) = fs::create_dir_all(&dst) {
                state.skip(entry.path(), e);
            }
        } else if file_type.is_symlink() {
            match safe_symlink_create(entry.path(), &dst) {
                Ok(true) => {
                    state.files_copied += 1;
                    state.listing.push(rel);
                }
                Ok(false) => state.skip(entry.path(), "unreadable symlink"),
                Err(e) => state.skip(entry.path(), e),
            }
            if let Some(progress) = progress.as_mut() {
                progress.file_done(0);
            }
        } else if file_type.is_file() {
            match copy_file_preserving(entry.path(), &dst) {
                Ok(bytes) => {
                    if options.manifest_sha {
                        match sha256_of_file(&dst) {
                            Ok(hash) => state.checksums.push((hash, rel.clone())),
                            Err(e) => {
                                let _ = fs::remove_file(&dst);
                                state.skip(entry.path(), e);
                                continue;
                            }
                        }
                    }
                    state.files_copied += 1;
                    state.bytes_copied += bytes;
                    state.listing.push(rel);
                    if let Some(progress) = progress.as_mut() {
                        progress.file_done(bytes);
                    }
                }
                Err(e) => {
                    let _ = fs::remove_file(&dst);
                    state.skip(entry.path(), e);
                }
            }
        } else {
            state.skip(entry.path(), "unsupported file type");
        }
    }

    Ok(state)
}

fn write_sidecar(path: &Path, body: &str) -> Result<()> {
    let mut file = fs::File::create(path).map_err(|e| VaultError::commit(path, e))?;
    file.write_all(body.as_bytes())
        .and_then(|_| file.sync_all())
        .map_err(|e| VaultError::commit(path, e))
}
