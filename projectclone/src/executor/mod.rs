//! Backup job executor - runs one strategy end-to-end.
//!
//! Order of a run: safety check, destination setup, pre-flight estimate,
//! dry-run short circuit, strategy, rotation. Every strategy builds its
//! output under a temporary name and commits it atomically.

pub mod archive;
pub mod atomic;
pub mod hooks;
pub mod rotation;
pub mod rsync;
pub mod tree;

use crate::fs::ignore::{load_patterns, IgnoreSet};
use crate::fs::walker::walk_stats;
use crate::lifecycle::RunContext;
use crate::transfer::progress::format_bytes;
use crate::utils::naming::{backup_record_name, sanitize_project, sanitize_token, timestamp};
use crate::vault::{self, check_destination_safety, SNAPSHOTS_DIR};
use crate::{Result, VaultError};
use archive::{ArchiveOptions, ARCHIVE_EXTENSION};
use hooks::Hooks;
use rsync::Rsync;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tree::{CopyOptions, SkippedFile};

/// How a backup record is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Plain directory copy
    #[default]
    Copy,
    /// `.tar.gz` archive
    Archive,
    /// Content-addressed vault snapshot
    Vault,
    /// rsync copy hard-linked against the previous record
    Incremental,
}

impl Strategy {
    pub fn label(self) -> &'static str {
        match self {
            Strategy::Copy => "copy",
            Strategy::Archive => "archive",
            Strategy::Vault => "vault",
            Strategy::Incremental => "incremental",
        }
    }
}

/// Output options shared by the strategies
#[derive(Debug, Clone, Default)]
pub struct BackupOptions {
    pub manifest: bool,
    pub manifest_sha: bool,
    pub preserve_symlinks: bool,
    pub show_progress: bool,
}

/// Backup job configuration
#[derive(Debug, Clone)]
pub struct BackupJob {
    pub source: PathBuf,

    /// Destination root, or the vault root for [`Strategy::Vault`]
    pub dest_root: PathBuf,

    /// Defaults to the source directory name
    pub project: Option<String>,

    pub note: String,
    pub strategy: Strategy,
    pub options: BackupOptions,
    pub excludes: Vec<String>,

    /// Records to keep per project, 0 disables rotation
    pub keep: usize,

    pub dry_run: bool,
    pub hooks: Hooks,
}

impl BackupJob {
    pub fn new(source: impl Into<PathBuf>, dest_root: impl Into<PathBuf>, note: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            dest_root: dest_root.into(),
            project: None,
            note: note.into(),
            strategy: Strategy::default(),
            options: BackupOptions::default(),
            excludes: Vec::new(),
            keep: 0,
            dry_run: false,
            hooks: Hooks::default(),
        }
    }

    /// Sanitized project name
    pub fn project_name(&self) -> String {
        match &self.project {
            Some(project) => sanitize_project(project),
            None => {
                let absolute = std::path::absolute(&self.source).unwrap_or_else(|_| self.source.clone());
                let base = absolute
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                sanitize_project(&base)
            }
        }
    }
}

/// Backup execution result
#[derive(Debug, Clone)]
pub struct BackupResult {
    pub final_path: PathBuf,
    pub bytes_processed: u64,
    pub files_processed: usize,
    pub skipped: Vec<SkippedFile>,
    pub dry_run: bool,
}

/// Size estimate taken before a run
#[derive(Debug, Clone, Copy)]
pub struct Preflight {
    pub files: usize,
    pub bytes: u64,
    pub free_bytes: Option<u64>,
}

impl Preflight {
    pub fn exceeds_free_space(&self) -> bool {
        self.free_bytes.is_some_and(|free| self.bytes > free)
    }
}

/// Main backup executor
pub struct BackupExecutor {
    ctx: RunContext,
    rsync: Rsync,
}

impl BackupExecutor {
    pub fn new(ctx: RunContext) -> Self {
        Self {
            ctx,
            rsync: Rsync::default(),
        }
    }

    /// Use a specific rsync binary for [`Strategy::Incremental`]
    pub fn with_rsync(mut self, rsync: Rsync) -> Self {
        self.rsync = rsync;
        self
    }

    /// Execute a backup job
    pub fn execute(&self, job: &BackupJob) -> Result<BackupResult> {
        let project = job.project_name();
        let note = sanitize_token(&job.note);

        let metadata = fs::metadata(&job.source)?;
        if !metadata.is_dir() && job.strategy != Strategy::Archive {
            return Err(VaultError::Config(format!(
                "source is not a directory: {}",
                job.source.display()
            )));
        }

        let patterns = self.patterns_for(job)?;
        check_destination_safety(&job.source, &job.dest_root, &IgnoreSet::with_root(&patterns, &job.source))?;

        if !job.dry_run {
            fs::create_dir_all(&job.dest_root)?;
        }

        let preflight = preflight(&job.source, &job.dest_root, &patterns);
        info!(
            files = preflight.files,
            size = %format_bytes(preflight.bytes),
            free = ?preflight.free_bytes.map(format_bytes),
            "Pre-flight estimate"
        );
        if preflight.exceeds_free_space() {
            warn!("WARNING: estimated backup size exceeds free space");
        }

        let record = backup_record_name(&project, &note);

        if job.dry_run {
            let final_path = self.dry_run_path(job, &record, &project)?;
            info!(
                strategy = job.strategy.label(),
                path = %final_path.display(),
                files = preflight.files,
                "Dry run completed"
            );
            return Ok(BackupResult {
                final_path,
                bytes_processed: preflight.bytes,
                files_processed: preflight.files,
                skipped: Vec::new(),
                dry_run: true,
            });
        }

        info!(strategy = job.strategy.label(), record = %record, "Running backup");
        let result = self.run_strategy(job, &record, &project, &patterns)?;

        if job.keep > 0 {
            let rotation_root = match job.strategy {
                Strategy::Vault => job.dest_root.join(SNAPSHOTS_DIR),
                _ => job.dest_root.clone(),
            };
            match rotation::rotate_backups(&rotation_root, job.keep, &project) {
                Ok(removed) if !removed.is_empty() => info!(removed = removed.len(), keep = job.keep, "Rotated old backups"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Rotation failed"),
            }
        }

        info!(
            path = %result.final_path.display(),
            files = result.files_processed,
            size = %format_bytes(result.bytes_processed),
            skipped = result.skipped.len(),
            "Backup completed"
        );
        Ok(result)
    }

    /// Refuse a job whose destination is its source, or sits inside the
    /// source without being excluded.
    pub fn check_safety(&self, job: &BackupJob) -> Result<()> {
        let patterns = self.patterns_for(job)?;
        check_destination_safety(&job.source, &job.dest_root, &IgnoreSet::with_root(&patterns, &job.source))
    }

    /// Copy and archive honour the job's excludes only; vault and
    /// incremental runs add the default ignores and `.vaultignore`.
    fn patterns_for(&self, job: &BackupJob) -> Result<Vec<String>> {
        match job.strategy {
            Strategy::Copy | Strategy::Archive => Ok(job.excludes.clone()),
            Strategy::Vault | Strategy::Incremental => {
                let mut patterns = load_patterns(&job.source)?;
                patterns.extend(job.excludes.iter().cloned());
                Ok(patterns)
            }
        }
    }

    fn dry_run_path(&self, job: &BackupJob, record: &str, project: &str) -> Result<PathBuf> {
        Ok(match job.strategy {
            Strategy::Copy => job.dest_root.join(record),
            Strategy::Archive => job.dest_root.join(format!("{record}{ARCHIVE_EXTENSION}")),
            Strategy::Vault => job
                .dest_root
                .join(SNAPSHOTS_DIR)
                .join(format!("{}-{}-snapshot.json", timestamp(), project)),
            Strategy::Incremental => {
                self.rsync.incremental(
                    &job.source,
                    &job.dest_root,
                    record,
                    None,
                    &IgnoreSet::default(),
                    true,
                    &self.ctx,
                )?
            }
        })
    }

    fn run_strategy(&self, job: &BackupJob, record: &str, project: &str, patterns: &[String]) -> Result<BackupResult> {
        let opts = &job.options;
        match job.strategy {
            Strategy::Copy => {
                let options = CopyOptions {
                    excludes: patterns.to_vec(),
                    manifest: opts.manifest,
                    manifest_sha: opts.manifest_sha,
                    preserve_symlinks: opts.preserve_symlinks,
                    show_progress: opts.show_progress,
                };
                let report = tree::copy_tree_atomic(&job.source, &job.dest_root, record, &options, &self.ctx)?;
                Ok(BackupResult {
                    final_path: report.final_path,
                    bytes_processed: report.bytes_copied,
                    files_processed: report.files_copied,
                    skipped: report.skipped,
                    dry_run: false,
                })
            }
            Strategy::Archive => {
                let options = ArchiveOptions {
                    arcname: Some(format!("{project}-{}", sanitize_token(&job.note))),
                    preserve_symlinks: opts.preserve_symlinks,
                    manifest_sha: opts.manifest || opts.manifest_sha,
                    excludes: patterns.to_vec(),
                };
                let report =
                    archive::create_archive_report(&job.source, &job.dest_root.join(record), &options, &self.ctx)?;
                Ok(BackupResult {
                    final_path: report.archive_path,
                    bytes_processed: report.bytes,
                    files_processed: report.files,
                    skipped: Vec::new(),
                    dry_run: false,
                })
            }
            Strategy::Vault => {
                let snapshot = vault::backup_to_vault_with_excludes(
                    &job.source,
                    &job.dest_root,
                    Some(project),
                    &job.excludes,
                    &job.hooks,
                    &self.ctx,
                )?;
                Ok(BackupResult {
                    final_path: snapshot.manifest_path,
                    bytes_processed: snapshot.bytes,
                    files_processed: snapshot.files,
                    skipped: snapshot.skipped,
                    dry_run: false,
                })
            }
            Strategy::Incremental => {
                if !self.rsync.is_available() {
                    return Err(VaultError::ToolMissing("rsync".to_string()));
                }
                let link_dest = rotation::latest_backup(&job.dest_root, project)?;
                match &link_dest {
                    Some(base) => info!(base = %base.display(), "Hard-linking against previous backup"),
                    None => info!("No previous backup, running a full rsync copy"),
                }
                let final_path = self.rsync.incremental(
                    &job.source,
                    &job.dest_root,
                    record,
                    link_dest.as_deref(),
                    &IgnoreSet::with_root(patterns, &job.source),
                    false,
                    &self.ctx,
                )?;
                let (files, bytes) = walk_stats::<&str>(&final_path, &[]);
                Ok(BackupResult {
                    final_path,
                    bytes_processed: bytes,
                    files_processed: files,
                    skipped: Vec::new(),
                    dry_run: false,
                })
            }
        }
    }
}

/// Count what a run would copy and look up free space at the destination.
pub fn preflight<S: AsRef<str>>(source: &Path, dest_root: &Path, excludes: &[S]) -> Preflight {
    let (files, bytes) = walk_stats(source, excludes);
    Preflight {
        files,
        bytes,
        free_bytes: free_space(dest_root),
    }
}

/// Free bytes available to unprivileged users on the filesystem holding
/// `path`, or its nearest existing ancestor.
#[cfg(unix)]
pub fn free_space(path: &Path) -> Option<u64> {
    let existing = path.ancestors().find(|p| p.exists())?;
    let stat = nix::sys::statvfs::statvfs(existing).ok()?;
    Some((stat.blocks_available() as u64).saturating_mul(stat.fragment_size() as u64))
}

#[cfg(not(unix))]
pub fn free_space(_path: &Path) -> Option<u64> {
    None
}
