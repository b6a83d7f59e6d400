//! projectclone - main entry point
//!
//! Snapshot the current project into a backup destination with one of
//! four strategies.

use anyhow::Result;
use clap::Parser;
use projectclone::config::{expand_home, Config};
use projectclone::executor::hooks::Hooks;
use projectclone::executor::{preflight, BackupExecutor, BackupJob, BackupOptions, Strategy};
use projectclone::lifecycle::shutdown::CANCELLED_EXIT_CODE;
use projectclone::lifecycle::{CleanupRegistry, RunContext, ShutdownCoordinator};
use projectclone::transfer::progress::format_bytes;
use projectclone::utils::{self, naming, VaultError};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// How long a cancelled pipeline gets to unwind before the final sweep
const UNWIND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "projectclone", author, version, about, long_about = None)]
struct Args {
    /// Short note appended to the backup name
    short_note: String,

    /// Destination root (default: ~/project_backups)
    #[arg(long, value_name = "DIR")]
    dest: Option<PathBuf>,

    /// Directory to back up
    #[arg(long, value_name = "DIR", default_value = ".")]
    source: PathBuf,

    /// Project name (default: source directory name)
    #[arg(long)]
    project: Option<String>,

    /// Write a .tar.gz archive
    #[arg(long, conflicts_with_all = ["incremental", "vault"])]
    archive: bool,

    /// rsync copy hard-linked against the previous backup
    #[arg(long, conflicts_with_all = ["archive", "vault"])]
    incremental: bool,

    /// Content-addressed snapshot into the destination as a vault
    #[arg(long, conflicts_with_all = ["archive", "incremental"])]
    vault: bool,

    /// Write MANIFEST.txt
    #[arg(long)]
    manifest: bool,

    /// Write MANIFEST_SHA256.txt (or an archive .sha256 sidecar)
    #[arg(long)]
    manifest_sha: bool,

    /// Copy symlinks as links instead of following them
    #[arg(long)]
    preserve_symlinks: bool,

    /// Keep only the N newest backups of this project (0 keeps all)
    #[arg(long, value_name = "N")]
    keep: Option<usize>,

    /// Exclude pattern (repeatable)
    #[arg(long = "exclude", value_name = "PATTERN")]
    excludes: Vec<String>,

    /// Show what would happen without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Do not ask for confirmation
    #[arg(short, long)]
    yes: bool,

    /// Disable progress reporting
    #[arg(long)]
    no_progress: bool,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

impl Args {
    fn strategy(&self) -> Strategy {
        if self.archive {
            Strategy::Archive
        } else if self.incremental {
            Strategy::Incremental
        } else if self.vault {
            Strategy::Vault
        } else {
            Strategy::Copy
        }
    }

    fn into_job(self, config: &Config) -> BackupJob {
        let strategy = self.strategy();
        let source = std::path::absolute(&self.source).unwrap_or_else(|_| self.source.clone());
        let dest_root = self
            .dest
            .as_deref()
            .map(expand_home)
            .unwrap_or_else(|| config.backup.dest.clone());

        let mut excludes = config.backup.excludes.clone();
        excludes.extend(self.excludes);

        BackupJob {
            source,
            dest_root,
            project: self.project,
            note: self.short_note,
            strategy,
            options: BackupOptions {
                manifest: self.manifest || config.backup.manifest,
                manifest_sha: self.manifest_sha || config.backup.manifest_sha,
                preserve_symlinks: self.preserve_symlinks || config.backup.preserve_symlinks,
                show_progress: !self.no_progress && config.backup.show_progress,
            },
            excludes,
            keep: self.keep.unwrap_or(config.backup.keep),
            dry_run: self.dry_run,
            hooks: Hooks {
                pre_snapshot: config.hooks.pre_snapshot.clone(),
                post_snapshot: config.hooks.post_snapshot.clone(),
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    let log_level = args.log_level.clone().unwrap_or_else(|| config.log.level.clone());
    let assume_yes = args.yes;
    let job = args.into_job(&config);
    let project = job.project_name();

    let registry = Arc::new(CleanupRegistry::new());
    let coordinator = ShutdownCoordinator::new(Arc::clone(&registry));
    let executor = BackupExecutor::new(RunContext::new(Arc::clone(&registry), coordinator.token()));

    // Nothing may be written before the destination is known to be safe
    executor.check_safety(&job)?;

    if !confirmed(&job, assume_yes, io::stdin().lock(), io::stdout())? {
        eprintln!("Aborted.");
        std::process::exit(1);
    }

    let log_file = log_file_path(&config, &job, &project);
    if let Some(dir) = log_file.as_deref().and_then(|p| p.parent()) {
        std::fs::create_dir_all(dir)?;
    }
    utils::logger::init(&log_level, log_file.as_deref())?;

    log_start(&job);

    let mut handle = tokio::task::spawn_blocking(move || executor.execute(&job));

    let outcome = tokio::select! {
        joined = &mut handle => joined,
        _ = coordinator.wait_for_signal() => {
            // The pipeline observes the token at its next safe point
            if tokio::time::timeout(UNWIND_TIMEOUT, &mut handle).await.is_err() {
                tracing::warn!("Backup did not stop in time, exiting anyway");
            }
            registry.cleanup();
            std::process::exit(CANCELLED_EXIT_CODE);
        }
    };

    registry.cleanup();

    match outcome {
        Ok(Ok(result)) => {
            if !result.skipped.is_empty() {
                tracing::warn!(skipped = result.skipped.len(), "Some files could not be copied");
            }
            if result.dry_run {
                println!("Dry run: would create {}", result.final_path.display());
            } else {
                println!("Backup created: {}", result.final_path.display());
            }
            Ok(())
        }
        Ok(Err(VaultError::Cancelled)) => {
            tracing::warn!("Backup cancelled");
            std::process::exit(CANCELLED_EXIT_CODE);
        }
        Ok(Err(e)) => {
            tracing::error!("Backup failed: {}", e);
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!("Backup task panicked: {}", e);
            std::process::exit(1);
        }
    }
}

/// Per-run log file in the destination, dry runs included.
fn log_file_path(config: &Config, job: &BackupJob, project: &str) -> Option<PathBuf> {
    config
        .log
        .file
        .then(|| job.dest_root.join(format!("backup_{}_{}.log", naming::timestamp(), project)))
}

fn log_start(job: &BackupJob) {
    tracing::info!(
        "Starting backup for {} -> {} ({}, projectclone v{})",
        job.source.display(),
        job.dest_root.display(),
        job.strategy.label(),
        env!("CARGO_PKG_VERSION")
    );
}

/// A real run without `--yes` must be confirmed; dry runs never ask.
fn confirmed<R: BufRead, W: Write>(job: &BackupJob, assume_yes: bool, input: R, output: W) -> io::Result<bool> {
    if job.dry_run || assume_yes {
        return Ok(true);
    }
    confirm(job, input, output)
}

/// Show what is about to happen and ask `Proceed? [y/N]`.
fn confirm<R: BufRead, W: Write>(job: &BackupJob, mut input: R, mut output: W) -> io::Result<bool> {
    let estimate = preflight(&job.source, &job.dest_root, &job.excludes);

    writeln!(output, "Source:      {}", job.source.display())?;
    writeln!(output, "Destination: {}", job.dest_root.display())?;
    writeln!(output, "Strategy:    {}", job.strategy.label())?;
    writeln!(output, "Estimated:   {} files, {}", estimate.files, format_bytes(estimate.bytes))?;
    if let Some(free) = estimate.free_bytes {
        writeln!(output, "Free space:  {}", format_bytes(free))?;
    }
    if estimate.exceeds_free_space() {
        writeln!(output, "WARNING: estimated backup size exceeds free space")?;
    }

    write!(output, "Proceed? [y/N] ")?;
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
