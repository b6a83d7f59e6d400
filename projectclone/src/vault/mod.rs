//! Content-addressed vault snapshots.
//!
//! Layout: `<vault>/objects/` holds blobs keyed by SHA-256 and
//! `<vault>/snapshots/` holds one JSON manifest per run. Objects are
//! additive-only; nothing here ever deletes one.

pub mod manifest;
pub mod objects;

pub use manifest::{create_snapshot_structure, load_manifest, save_manifest, FileEntry, Manifest};
pub use objects::{store_object, ObjectStore, StoredObject};

use crate::executor::hooks::Hooks;
use crate::executor::tree::SkippedFile;
use crate::fs::ignore::{normalize, IgnoreSet};
use crate::fs::metadata::FileMetadata;
use crate::fs::walker::{walk, WalkOptions};
use crate::lifecycle::RunContext;
use crate::utils::naming::sanitize_project;
use crate::{Result, VaultError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const OBJECTS_DIR: &str = "objects";
pub const SNAPSHOTS_DIR: &str = "snapshots";

/// Outcome of one vault snapshot
#[derive(Debug, Clone)]
pub struct VaultSnapshot {
    pub manifest_path: PathBuf,
    pub files: usize,
    pub bytes: u64,
    pub objects_written: usize,
    pub skipped: Vec<SkippedFile>,
}

/// Snapshot `source` into `vault` with the default ignore rules plus the
/// source's `.vaultignore`.
pub fn backup_to_vault(
    source: &Path,
    vault: &Path,
    project: Option<&str>,
    hooks: &Hooks,
    ctx: &RunContext,
) -> Result<VaultSnapshot> {
    backup_to_vault_with_excludes::<&str>(source, vault, project, &[], hooks, ctx)
}

/// Like [`backup_to_vault`] with extra exclude patterns.
pub fn backup_to_vault_with_excludes<S: AsRef<str>>(
    source: &Path,
    vault: &Path,
    project: Option<&str>,
    excludes: &[S],
    hooks: &Hooks,
    ctx: &RunContext,
) -> Result<VaultSnapshot> {
    hooks.run_pre()?;

    let ignore = IgnoreSet::for_source(source, excludes)?;
    check_destination_safety(source, vault, &ignore)?;

    let project = match project {
        Some(name) => sanitize_project(name),
        None => sanitize_project(&source_basename(source)),
    };
    info!(project = %project, source = %source.display(), vault = %vault.display(), "Starting vault snapshot");

    let store = ObjectStore::new(vault.join(OBJECTS_DIR)).with_registry(ctx.registry.clone());
    let mut manifest = create_snapshot_structure(source);
    let mut objects_written = 0usize;
    let mut skipped = Vec::new();

    let options = WalkOptions::with_ignore(ignore);
    for entry in walk(source, &options) {
        ctx.check_cancelled()?;

        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| source.to_path_buf());
                warn!(path = %path.display(), error = %e, "Skipping unreadable entry");
                skipped.push(SkippedFile {
                    path,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }
        if file_type.is_symlink() {
            // Only links that resolve to a regular file are stored, by content
            let resolves_to_file = fs::metadata(entry.path()).map(|m| m.is_file()).unwrap_or(false);
            if !resolves_to_file {
                warn!(path = %entry.path().display(), "Skipping symlink that does not point to a regular file");
                skipped.push(SkippedFile {
                    path: entry.path().to_path_buf(),
                    reason: "symlink target is not a regular file".to_string(),
                });
                continue;
            }
        } else if !file_type.is_file() {
            skipped.push(SkippedFile {
                path: entry.path().to_path_buf(),
                reason: "unsupported file type".to_string(),
            });
            continue;
        }

        let stored = store.store(entry.path())?;
        let metadata = FileMetadata::from_path(entry.path())?;
        if stored.written {
            objects_written += 1;
        }

        let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
        manifest.insert(
            normalize(relative),
            FileEntry {
                hash: stored.hash,
                mode: metadata.mode,
                mtime: metadata.mtime,
                size: metadata.size,
            },
        );
    }

    ctx.check_cancelled()?;
    let manifest_path = save_manifest(&manifest, &vault.join(SNAPSHOTS_DIR), &project)?;

    info!(
        manifest = %manifest_path.display(),
        files = manifest.len(),
        new_objects = objects_written,
        "Vault snapshot saved"
    );

    hooks.run_post()?;

    Ok(VaultSnapshot {
        manifest_path,
        files: manifest.len(),
        bytes: manifest.total_bytes(),
        objects_written,
        skipped,
    })
}

/// Refuse destinations that would back up into themselves.
///
/// The destination may not be the source, and may only live inside the
/// source when `ignore` excludes it (or one of its ancestors).
pub fn check_destination_safety(source: &Path, destination: &Path, ignore: &IgnoreSet) -> Result<()> {
    let source_abs = resolve(source);
    let dest_abs = resolve(destination);

    if source_abs == dest_abs {
        return Err(VaultError::SafetyViolation {
            message: "destination is the source directory".to_string(),
            source_path: source_abs,
            destination: dest_abs,
        });
    }

    if let Ok(relative) = dest_abs.strip_prefix(&source_abs) {
        let excluded = relative
            .ancestors()
            .filter(|p| !p.as_os_str().is_empty())
            .any(|p| ignore.is_ignored(p));
        if !excluded {
            return Err(VaultError::SafetyViolation {
                message: "destination is inside the source and not ignored; add it to .vaultignore or move it outside"
                    .to_string(),
                source_path: source_abs,
                destination: dest_abs,
            });
        }
    }

    Ok(())
}

/// Absolute form of `path` with symlinks resolved as far as the path exists.
fn resolve(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());

    let mut existing = absolute.as_path();
    let mut rest = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            return rest.iter().rev().fold(canonical, |acc, part| acc.join(part));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name.to_os_string());
                existing = parent;
            }
            _ => return absolute,
        }
    }
}

fn source_basename(source: &Path) -> String {
    resolve(source)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn source_tree(root: &Path) -> std::io::Result<PathBuf> {
        let source = root.join("my project");
        fs::create_dir_all(source.join("src"))?;
        fs::create_dir_all(source.join(".git"))?;
        fs::write(source.join("README.md"), "readme")?;
        fs::write(source.join("src/main.rs"), "fn main() {}")?;
        fs::write(source.join("src/copy.rs"), "fn main() {}")?;
        fs::write(source.join(".git/HEAD"), "ref: refs/heads/main")?;
        Ok(source)
    }

    #[test]
    fn test_backup_to_vault() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let source = source_tree(temp_dir.path())?;
        let vault = temp_dir.path().join("vault");

        let snapshot = backup_to_vault(&source, &vault, None, &Hooks::default(), &RunContext::default())?;

        let name = snapshot.manifest_path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with("-my_project-snapshot.json"), "{name}");

        let manifest = load_manifest(&snapshot.manifest_path)?;
        let paths: Vec<&str> = manifest.files.keys().map(String::as_str).collect();
        assert_eq!(paths, vec!["README.md", "src/copy.rs", "src/main.rs"]);
        // identical content is stored once
        assert_eq!(snapshot.objects_written, 2);
        assert_eq!(
            manifest.files["src/main.rs"].hash,
            manifest.files["src/copy.rs"].hash
        );

        let store = ObjectStore::new(vault.join(OBJECTS_DIR));
        for entry in manifest.files.values() {
            assert!(store.contains(&entry.hash));
        }
        Ok(())
    }

    #[test]
    fn test_second_snapshot_dedups_everything() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let source = source_tree(temp_dir.path())?;
        let vault = temp_dir.path().join("vault");
        let ctx = RunContext::default();

        backup_to_vault(&source, &vault, Some("p"), &Hooks::default(), &ctx)?;
        let second = backup_to_vault(&source, &vault, Some("p"), &Hooks::default(), &ctx)?;

        assert_eq!(second.objects_written, 0);
        assert_eq!(fs::read_dir(vault.join(SNAPSHOTS_DIR))?.count(), 2);
        Ok(())
    }

    #[test]
    fn test_vaultignore_is_honoured() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let source = source_tree(temp_dir.path())?;
        fs::write(source.join(".vaultignore"), "# generated\n*.md\n")?;

        let snapshot = backup_to_vault(
            &source,
            &temp_dir.path().join("vault"),
            None,
            &Hooks::default(),
            &RunContext::default(),
        )?;

        let manifest = load_manifest(&snapshot.manifest_path)?;
        assert!(!manifest.files.contains_key("README.md"));
        assert!(!manifest.files.contains_key(".vaultignore"));
        Ok(())
    }

    #[test]
    fn test_vault_equal_to_source_is_refused() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let source = source_tree(temp_dir.path())?;

        let result = backup_to_vault(&source, &source, None, &Hooks::default(), &RunContext::default());

        assert!(matches!(result, Err(VaultError::SafetyViolation { .. })));
        assert!(!source.join(OBJECTS_DIR).exists());
        assert!(!source.join(SNAPSHOTS_DIR).exists());
        Ok(())
    }

    #[test]
    fn test_nested_vault_requires_ignore() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let source = source_tree(temp_dir.path())?;
        let vault = source.join("backups/vault");

        let refused = backup_to_vault(&source, &vault, None, &Hooks::default(), &RunContext::default());
        assert!(matches!(refused, Err(VaultError::SafetyViolation { .. })));
        assert!(!vault.exists());

        fs::write(source.join(".vaultignore"), "backups\n")?;
        let snapshot = backup_to_vault(&source, &vault, None, &Hooks::default(), &RunContext::default())?;
        let manifest = load_manifest(&snapshot.manifest_path)?;
        assert!(manifest.files.keys().all(|k| !k.starts_with("backups")));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_handling() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let source = source_tree(temp_dir.path())?;
        std::os::unix::fs::symlink("README.md", source.join("link.md"))?;
        std::os::unix::fs::symlink("src", source.join("link_dir"))?;

        let snapshot = backup_to_vault(
            &source,
            &temp_dir.path().join("vault"),
            None,
            &Hooks::default(),
            &RunContext::default(),
        )?;

        let manifest = load_manifest(&snapshot.manifest_path)?;
        assert_eq!(manifest.files["link.md"].hash, manifest.files["README.md"].hash);
        assert!(!manifest.files.contains_key("link_dir"));
        assert_eq!(snapshot.skipped.len(), 1);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_pre_hook_aborts_before_writing() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let source = source_tree(temp_dir.path())?;
        let vault = temp_dir.path().join("vault");
        let hooks = Hooks {
            pre_snapshot: Some("exit 1".to_string()),
            post_snapshot: None,
        };

        let result = backup_to_vault(&source, &vault, None, &hooks, &RunContext::default());

        assert!(matches!(result, Err(VaultError::Hook { .. })));
        assert!(!vault.exists());
        Ok(())
    }

    #[test]
    fn test_cancelled_snapshot_saves_no_manifest() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let source = source_tree(temp_dir.path())?;
        let vault = temp_dir.path().join("vault");
        let ctx = RunContext::default();
        ctx.cancel.cancel();

        let result = backup_to_vault(&source, &vault, None, &Hooks::default(), &ctx);

        assert!(matches!(result, Err(VaultError::Cancelled)));
        assert!(!vault.join(SNAPSHOTS_DIR).exists());
        Ok(())
    }
}
