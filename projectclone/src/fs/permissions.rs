//! Permission sanitizing and symlink recreation for copied entries.
//!
//! Only ever applied to the copy, never to the source tree.

use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, warn};

/// setuid | setgid | sticky
pub const DANGEROUS_BITS: u32 = 0o7000;

/// Clear setuid/setgid/sticky on a regular file, keeping the other bits.
///
/// Symlinks and non-regular files are left alone. Returns whether the mode
/// was rewritten.
#[cfg(unix)]
pub fn clear_dangerous_bits(path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::symlink_metadata(path)?;
    if !metadata.file_type().is_file() {
        return Ok(false);
    }

    let mode = metadata.permissions().mode();
    if mode & DANGEROUS_BITS == 0 {
        return Ok(false);
    }

    let cleared = mode & !DANGEROUS_BITS;
    fs::set_permissions(path, fs::Permissions::from_mode(cleared))?;
    debug!(path = %path.display(), from = format!("{:o}", mode), to = format!("{:o}", cleared), "Cleared dangerous mode bits");
    Ok(true)
}

#[cfg(not(unix))]
pub fn clear_dangerous_bits(_path: &Path) -> io::Result<bool> {
    Ok(false)
}

/// Recreate `src_link` at `dst_link` with the identical target string.
///
/// The target is not resolved or relativized, so dangling, absolute and
/// relative links are preserved exactly. If `src_link` is not a readable
/// symlink nothing is created and `Ok(false)` is returned. An existing entry
/// at `dst_link` is replaced.
pub fn safe_symlink_create(src_link: &Path, dst_link: &Path) -> io::Result<bool> {
    let target = match fs::read_link(src_link) {
        Ok(target) => target,
        Err(e) => {
            warn!(path = %src_link.display(), error = %e, "Not a readable symlink, skipping");
            return Ok(false);
        }
    };

    match fs::symlink_metadata(dst_link) {
        Ok(existing) if existing.is_dir() => fs::remove_dir_all(dst_link)?,
        Ok(_) => fs::remove_file(dst_link)?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    create_symlink(&target, dst_link)?;
    Ok(true)
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    let resolved = link.parent().map(|p| p.join(target)).unwrap_or_else(|| target.to_path_buf());
    if resolved.is_dir() {
        std::os::windows::fs::symlink_dir(target, link)
    } else {
        std::os::windows::fs::symlink_file(target, link)
    }
}
