//! Compressed archive records (`.tar.gz`).
//!
//! The archive is written to a hidden temporary next to its final name and
//! committed once complete. Any failure while building is fatal and removes
//! the temporary, so a visible `.tar.gz` is always a finished archive.

use super::atomic::atomic_move_tracked;
use crate::fs::ignore::{normalize, IgnoreSet};
use crate::fs::permissions::DANGEROUS_BITS;
use crate::fs::walker::{walk, WalkOptions};
use crate::lifecycle::RunContext;
use crate::utils::hash::sha256_of_file;
use crate::utils::naming::{make_unique_path, temp_sibling};
use crate::{Result, VaultError};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tar::{Builder, EntryType, Header, HeaderMode};
use tracing::info;

pub const ARCHIVE_EXTENSION: &str = ".tar.gz";

#[derive(Debug, Clone, Default)]
pub struct ArchiveOptions {
    /// Root name recorded inside the archive (defaults to the source's name)
    pub arcname: Option<String>,

    /// Store symlinks as links instead of the content they point to
    pub preserve_symlinks: bool,

    /// Write `<archive>.sha256` next to the archive
    pub manifest_sha: bool,

    /// Patterns left out of the archive, relative to the source
    pub excludes: Vec<String>,
}

/// Result of a committed archive
#[derive(Debug, Clone)]
pub struct ArchiveReport {
    pub archive_path: PathBuf,
    pub sidecar_path: Option<PathBuf>,
    pub files: usize,
    pub bytes: u64,
}

/// Archive `source` (a directory or a single file) to `<dest_base>.tar.gz`,
/// suffixed when that name is taken. Returns the committed archive path.
pub fn create_archive(source: &Path, dest_base: &Path, options: &ArchiveOptions, ctx: &RunContext) -> Result<PathBuf> {
    Ok(create_archive_report(source, dest_base, options, ctx)?.archive_path)
}

pub fn create_archive_report(
    source: &Path,
    dest_base: &Path,
    options: &ArchiveOptions,
    ctx: &RunContext,
) -> Result<ArchiveReport> {
    let wanted = archive_name(dest_base);
    let parent = wanted.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    let file_name = wanted
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| format!("archive{ARCHIVE_EXTENSION}"));

    let source_meta = fs::metadata(source).map_err(|e| VaultError::archive(&wanted, e))?;
    fs::create_dir_all(&parent).map_err(|e| VaultError::archive(&wanted, e))?;

    let arcname = options.arcname.clone().unwrap_or_else(|| {
        source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "backup".to_string())
    });

    let tmp = temp_sibling(&parent, &file_name);
    ctx.registry.register_file(&tmp);

    let built = if source_meta.is_dir() {
        build_tree_archive(source, &tmp, &arcname, options, ctx)
    } else {
        build_single_file_archive(source, &tmp, &arcname).map_err(|e| VaultError::archive(&wanted, e))
    };
    let (files, bytes) = match built {
        Ok(counts) => counts,
        Err(e) => {
            ctx.registry.discard(&tmp);
            return Err(e);
        }
    };

    if let Err(e) = ctx.check_cancelled() {
        ctx.registry.discard(&tmp);
        return Err(e);
    }

    let archive_path = make_unique_path(&wanted);
    if let Err(e) = atomic_move_tracked(&tmp, &archive_path, &ctx.registry) {
        ctx.registry.discard(&tmp);
        return Err(e);
    }
    ctx.registry.release(&tmp);

    let sidecar_path = if options.manifest_sha {
        Some(write_checksum_sidecar(&archive_path, ctx)?)
    } else {
        None
    };

    info!(path = %archive_path.display(), files, bytes, "Archive committed");

    Ok(ArchiveReport {
        archive_path,
        sidecar_path,
        files,
        bytes,
    })
}

/// `base` with `.tar.gz` appended unless it already ends with it.
fn archive_name(base: &Path) -> PathBuf {
    if base.to_string_lossy().ends_with(ARCHIVE_EXTENSION) {
        base.to_path_buf()
    } else {
        let mut name = base.as_os_str().to_owned();
        name.push(ARCHIVE_EXTENSION);
        PathBuf::from(name)
    }
}

fn build_tree_archive(
    source: &Path,
    tmp: &Path,
    arcname: &str,
    options: &ArchiveOptions,
    ctx: &RunContext,
) -> Result<(usize, u64)> {
    let fail = |e: io::Error| VaultError::archive(tmp, e);

    let file = File::create(tmp).map_err(fail)?;
    let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);

    let walk_options = WalkOptions {
        follow_links: !options.preserve_symlinks,
        ignore: IgnoreSet::with_root(&options.excludes, source),
    };

    let mut files = 0usize;
    let mut bytes = 0u64;

    for entry in walk(source, &walk_options) {
        ctx.check_cancelled()?;

        let entry = entry.map_err(|e| fail(e.into()))?;
        let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
        let name = if relative.as_os_str().is_empty() {
            arcname.to_string()
        } else {
            format!("{}/{}", arcname, normalize(relative))
        };

        let file_type = entry.file_type();
        if file_type.is_symlink() {
            let target = fs::read_link(entry.path()).map_err(fail)?;
            let metadata = fs::symlink_metadata(entry.path()).map_err(fail)?;
            let mut header = header_for(&metadata, EntryType::Symlink);
            builder.append_link(&mut header, &name, &target).map_err(fail)?;
            files += 1;
        } else if file_type.is_dir() {
            let metadata = entry.metadata().map_err(|e| fail(e.into()))?;
            let mut header = header_for(&metadata, EntryType::Directory);
            builder.append_data(&mut header, &name, io::empty()).map_err(fail)?;
        } else if file_type.is_file() {
            bytes += append_file(&mut builder, entry.path(), &name).map_err(fail)?;
            files += 1;
        } else {
            return Err(fail(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported file type: {}", entry.path().display()),
            )));
        }
    }

    finish(builder).map_err(fail)?;
    Ok((files, bytes))
}

fn build_single_file_archive(source: &Path, tmp: &Path, arcname: &str) -> io::Result<(usize, u64)> {
    let file = File::create(tmp)?;
    let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));
    let bytes = append_file(&mut builder, source, arcname)?;
    finish(builder)?;
    Ok((1, bytes))
}

fn append_file<W: Write>(builder: &mut Builder<W>, path: &Path, name: &str) -> io::Result<u64> {
    let metadata = fs::metadata(path)?;
    let mut file = File::open(path)?;
    let mut header = header_for(&metadata, EntryType::Regular);
    header.set_size(metadata.len());
    builder.append_data(&mut header, name, &mut file)?;
    Ok(metadata.len())
}

/// Header carrying `metadata` with setuid/setgid/sticky stripped.
fn header_for(metadata: &fs::Metadata, entry_type: EntryType) -> Header {
    let mut header = Header::new_gnu();
    header.set_metadata_in_mode(metadata, HeaderMode::Complete);
    header.set_entry_type(entry_type);
    if entry_type != EntryType::Regular {
        header.set_size(0);
    }
    if let Ok(mode) = header.mode() {
        header.set_mode(mode & !DANGEROUS_BITS);
    }
    header
}

fn finish(builder: Builder<GzEncoder<File>>) -> io::Result<()> {
    let encoder = builder.into_inner()?;
    let file = encoder.finish()?;
    file.sync_all()
}

/// Write `<archive>.sha256` containing `<hash>  <archive file name>`.
fn write_checksum_sidecar(archive: &Path, ctx: &RunContext) -> Result<PathBuf> {
    let hash = sha256_of_file(archive)?;
    let archive_name = archive
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut sidecar = archive.as_os_str().to_owned();
    sidecar.push(".sha256");
    let sidecar = PathBuf::from(sidecar);

    let parent = archive.parent().unwrap_or_else(|| Path::new("."));
    let tmp = temp_sibling(parent, &format!("{archive_name}.sha256"));
    ctx.registry.register_file(&tmp);

    let written = File::create(&tmp).and_then(|mut file| {
        writeln!(file, "{hash}  {archive_name}")?;
        file.sync_all()
    });
    if let Err(e) = written {
        ctx.registry.discard(&tmp);
        return Err(VaultError::commit(&sidecar, e));
    }

    if let Err(e) = atomic_move_tracked(&tmp, &sidecar, &ctx.registry) {
        ctx.registry.discard(&tmp);
        return Err(e);
    }
    ctx.registry.release(&tmp);
    Ok(sidecar)
}
