//! Rename-or-copy commit.
//!
//! After [`atomic_move`] returns `Ok`, `dst` holds the complete content and
//! `src` is gone. On error `src` is untouched and nothing exists at `dst`.
//! The cross-device fallback copies into a hidden sibling of `dst` and
//! renames that into place, so a partial `dst` is never observable. With a
//! registry the staging copy is registered while it exists, and a source
//! the fallback could not remove is left for [`CleanupRegistry::release`]
//! to keep registered.

use crate::fs::permissions::clear_dangerous_bits;
use crate::lifecycle::CleanupRegistry;
use crate::utils::naming::temp_sibling;
use crate::{Result, VaultError};
use filetime::FileTime;
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, warn};

/// The rename step of a commit. Tests substitute failing implementations.
pub trait Renamer {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
}

/// `std::fs::rename`
#[derive(Debug, Clone, Copy, Default)]
pub struct StdRenamer;

impl Renamer for StdRenamer {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }
}

pub fn atomic_move(src: &Path, dst: &Path) -> Result<()> {
    atomic_move_with(&StdRenamer, src, dst, None)
}

/// [`atomic_move`] that tracks its staging copy in `registry`.
pub fn atomic_move_tracked(src: &Path, dst: &Path, registry: &CleanupRegistry) -> Result<()> {
    atomic_move_with(&StdRenamer, src, dst, Some(registry))
}

pub fn atomic_move_with(
    renamer: &dyn Renamer,
    src: &Path,
    dst: &Path,
    registry: Option<&CleanupRegistry>,
) -> Result<()> {
    match renamer.rename(src, dst) {
        Ok(()) => {
            debug!(from = %src.display(), to = %dst.display(), "Renamed into place");
            Ok(())
        }
        Err(e) if is_cross_device(&e) => {
            debug!(from = %src.display(), to = %dst.display(), "Cross-device rename, falling back to copy");
            copy_then_remove(src, dst, registry)
        }
        Err(e) => Err(VaultError::commit(dst, e)),
    }
}

fn copy_then_remove(src: &Path, dst: &Path, registry: Option<&CleanupRegistry>) -> Result<()> {
    let parent = dst.parent().unwrap_or_else(|| Path::new("."));
    let name = dst
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "commit".to_string());
    let staging = temp_sibling(parent, &name);
    if let Some(registry) = registry {
        let is_dir = fs::symlink_metadata(src).map_err(|e| VaultError::commit(dst, e))?.is_dir();
        if is_dir {
            registry.register_dir(&staging);
        } else {
            registry.register_file(&staging);
        }
    }

    let staged = copy_recursive(src, &staging).and_then(|_| fs::rename(&staging, dst));
    if let Err(e) = staged {
        match registry {
            Some(registry) => registry.discard(&staging),
            None => remove_any(&staging),
        }
        return Err(VaultError::commit(dst, e));
    }
    if let Some(registry) = registry {
        registry.unregister(&staging);
    }

    if let Err(e) = remove_path(src) {
        warn!(path = %src.display(), error = %e, "Committed copy but could not remove source");
    }

    Ok(())
}

/// Copy `src` to `dst` recursively. Symlinks are recreated, file modes and
/// modification times are kept, dangerous bits are cleared on the copy.
pub fn copy_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(src)?;
    let file_type = metadata.file_type();

    if file_type.is_symlink() {
        let target = fs::read_link(src)?;
        create_symlink(&target, dst)?;
    } else if file_type.is_dir() {
        fs::create_dir(dst)?;
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &dst.join(entry.file_name()))?;
        }
        fs::set_permissions(dst, metadata.permissions())?;
    } else {
        copy_file_preserving(src, dst)?;
    }

    Ok(())
}

/// `fs::copy` plus the source's modification time, with dangerous bits
/// stripped from the result. Returns the number of bytes copied.
pub fn copy_file_preserving(src: &Path, dst: &Path) -> io::Result<u64> {
    let bytes = fs::copy(src, dst)?;
    let metadata = fs::metadata(src)?;
    filetime::set_file_mtime(dst, FileTime::from_last_modification_time(&metadata))?;
    clear_dangerous_bits(dst)?;
    Ok(bytes)
}

pub(crate) fn remove_path(path: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

fn remove_any(path: &Path) {
    match remove_path(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove staging copy"),
    }
}

#[cfg(unix)]
fn is_cross_device(err: &io::Error) -> bool {
    err.raw_os_error() == Some(nix::errno::Errno::EXDEV as i32)
}

#[cfg(not(unix))]
fn is_cross_device(err: &io::Error) -> bool {
    // ERROR_NOT_SAME_DEVICE
    err.raw_os_error() == Some(17)
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}
