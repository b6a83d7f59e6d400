//! Incremental copies through the external `rsync` binary.
//!
//! Unchanged files are hard-linked against the previous record with
//! `--link-dest`, so each record is a complete tree that only costs the
//! space of what changed. rsync writes into a hidden temporary directory
//! that is committed like any other tree copy.

use super::atomic::atomic_move_tracked;
use crate::fs::ignore::IgnoreSet;
use crate::lifecycle::RunContext;
use crate::utils::naming::{make_unique_path, temp_sibling};
use crate::{Result, VaultError};
use std::ffi::OsString;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Suffix of the placeholder path returned by a dry run
pub const DRY_RUN_SUFFIX: &str = "-DRYRUN";

/// Handle on an rsync executable.
#[derive(Debug, Clone)]
pub struct Rsync {
    binary: PathBuf,
}

impl Default for Rsync {
    fn default() -> Self {
        Self::new("rsync")
    }
}

impl Rsync {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }

    /// True when `<binary> --version` runs and exits zero.
    pub fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Arguments for copying `source` into `target`, with `ignore`
    /// translated to rsync filter rules.
    pub fn arguments(
        &self,
        source: &Path,
        target: &Path,
        ignore: &IgnoreSet,
        link_dest: Option<&Path>,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-a".into()];
        args.extend(ignore.rsync_filter_args().into_iter().map(OsString::from));
        if let Some(base) = link_dest {
            // rsync resolves a relative --link-dest against the target
            let base = std::path::absolute(base).unwrap_or_else(|_| base.to_path_buf());
            let mut flag = OsString::from("--link-dest=");
            flag.push(base.as_os_str());
            args.push(flag);
        }
        args.push(with_trailing_separator(source));
        args.push(with_trailing_separator(target));
        args
    }

    /// Copy `source` to `dest_root/name` (suffixed when taken).
    ///
    /// With `dry_run` nothing is created and `dest_root/<name>-DRYRUN` is
    /// returned. A non-zero exit is a [`VaultError::ExternalTool`] carrying
    /// the captured output.
    pub fn incremental(
        &self,
        source: &Path,
        dest_root: &Path,
        name: &str,
        link_dest: Option<&Path>,
        ignore: &IgnoreSet,
        dry_run: bool,
        ctx: &RunContext,
    ) -> Result<PathBuf> {
        if dry_run {
            let placeholder = dest_root.join(format!("{name}{DRY_RUN_SUFFIX}"));
            info!(path = %placeholder.display(), "Dry run, rsync not invoked");
            return Ok(placeholder);
        }

        fs::create_dir_all(dest_root).map_err(|e| VaultError::commit(dest_root, e))?;
        let tmp = temp_sibling(dest_root, name);
        ctx.registry.register_dir(&tmp);

        let result = self.run_into(source, dest_root, name, &tmp, link_dest, ignore, ctx);
        if result.is_err() {
            ctx.registry.discard(&tmp);
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn run_into(
        &self,
        source: &Path,
        dest_root: &Path,
        name: &str,
        tmp: &Path,
        link_dest: Option<&Path>,
        ignore: &IgnoreSet,
        ctx: &RunContext,
    ) -> Result<PathBuf> {
        fs::create_dir(tmp).map_err(|e| VaultError::commit(tmp, e))?;

        let args = self.arguments(source, tmp, ignore, link_dest);
        debug!(binary = %self.binary.display(), ?args, "Running rsync");

        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    VaultError::ToolMissing(self.binary.display().to_string())
                } else {
                    VaultError::Io(e)
                }
            })?;

        let (status, stdout, stderr) = wait_cancellable(child, ctx)?;
        if !status.success() {
            return Err(VaultError::ExternalTool {
                tool: "rsync".to_string(),
                code: status.code(),
                stdout,
                stderr,
            });
        }

        ctx.check_cancelled()?;
        let final_path = make_unique_path(&dest_root.join(name));
        atomic_move_tracked(tmp, &final_path, &ctx.registry)?;
        ctx.registry.release(tmp);

        info!(
            path = %final_path.display(),
            link_dest = ?link_dest.map(Path::display),
            "Incremental copy committed"
        );
        Ok(final_path)
    }
}

/// Probe the `rsync` on `PATH`.
pub fn have_rsync() -> bool {
    Rsync::default().is_available()
}

/// [`Rsync::incremental`] with the `rsync` on `PATH`. `excludes` follow the
/// ignore-pattern rules and are translated for rsync.
pub fn rsync_incremental<S: AsRef<str>>(
    source: &Path,
    dest_root: &Path,
    name: &str,
    link_dest: Option<&Path>,
    excludes: &[S],
    dry_run: bool,
    ctx: &RunContext,
) -> Result<PathBuf> {
    let ignore = IgnoreSet::with_root(excludes, source);
    Rsync::default().incremental(source, dest_root, name, link_dest, &ignore, dry_run, ctx)
}

/// Wait for `child` while draining its output, killing it if the run is
/// cancelled.
fn wait_cancellable(mut child: Child, ctx: &RunContext) -> Result<(ExitStatus, String, String)> {
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = loop {
        if ctx.cancel.is_cancelled() {
            warn!("Cancelling rsync");
            if let Err(e) = child.kill() {
                debug!(error = %e, "rsync already exited");
            }
            let _ = child.wait();
            return Err(VaultError::Cancelled);
        }
        match child.try_wait()? {
            Some(status) => break status,
            None => thread::sleep(POLL_INTERVAL),
        }
    };

    let stdout = stdout.join().unwrap_or_default();
    let stderr = stderr.join().unwrap_or_default();
    Ok((status, stdout, stderr))
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buffer);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    })
}

fn with_trailing_separator(path: &Path) -> OsString {
    let mut value = path.as_os_str().to_owned();
    if !value.to_string_lossy().ends_with(std::path::MAIN_SEPARATOR) {
        value.push(std::path::MAIN_SEPARATOR_STR);
    }
    value
}
