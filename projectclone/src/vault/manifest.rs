//! Snapshot manifests.
//!
//! A manifest maps each relative path (always `/`-separated) to the object
//! holding its content plus the metadata needed to restore it. Saved
//! manifests are never overwritten.

use crate::utils::naming::{make_unique_path, temp_sibling, timestamp};
use crate::{Result, VaultError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub const MANIFEST_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub hash: String,
    pub mode: u32,
    pub mtime: f64,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub source_root: String,
    pub created_at: DateTime<Utc>,
    pub files: BTreeMap<String, FileEntry>,
}

impl Manifest {
    /// Record `entry` under `relative_path`, replacing any earlier entry.
    pub fn insert(&mut self, relative_path: impl Into<String>, entry: FileEntry) {
        self.files.insert(relative_path.into(), entry);
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.values().map(|f| f.size).sum()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// An empty manifest bound to `source_root`.
pub fn create_snapshot_structure(source_root: &Path) -> Manifest {
    Manifest {
        version: MANIFEST_VERSION,
        source_root: source_root.to_string_lossy().to_string(),
        created_at: Utc::now(),
        files: BTreeMap::new(),
    }
}

/// Serialize `manifest` to `<snapshots_root>/<timestamp>-<project>-snapshot.json`
/// (suffixed when taken) and return the final path.
pub fn save_manifest(manifest: &Manifest, snapshots_root: &Path, project: &str) -> Result<PathBuf> {
    fs::create_dir_all(snapshots_root)?;

    let name = format!("{}-{}-snapshot.json", timestamp(), project);
    let body = serde_json::to_vec_pretty(manifest)?;

    let tmp = temp_sibling(snapshots_root, &name);
    let written = fs::File::create(&tmp).and_then(|mut file| {
        file.write_all(&body)?;
        file.sync_all()
    });
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(VaultError::commit(&tmp, e));
    }

    // hard_link refuses to replace an existing name, unlike rename
    let result = loop {
        let candidate = make_unique_path(&snapshots_root.join(&name));
        match fs::hard_link(&tmp, &candidate) {
            Ok(()) => break Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => break Err(VaultError::commit(candidate, e)),
        }
    };
    let _ = fs::remove_file(&tmp);
    result
}

pub fn load_manifest(path: &Path) -> Result<Manifest> {
    let content = fs::read(path)?;
    Ok(serde_json::from_slice(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(hash: &str, size: u64) -> FileEntry {
        FileEntry {
            hash: hash.to_string(),
            mode: 0o100644,
            mtime: 1_700_000_000.5,
            size,
        }
    }

    #[test]
    fn test_create_snapshot_structure() {
        let manifest = create_snapshot_structure(Path::new("/src/project"));
        assert_eq!(manifest.version, 2);
        assert_eq!(manifest.source_root, "/src/project");
        assert!(manifest.is_empty());
    }

    #[test]
    fn test_save_and_load() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let mut manifest = create_snapshot_structure(Path::new("/src"));
        manifest.insert("a.txt", entry("aa", 3));
        manifest.insert("dir/b.txt", entry("bb", 4));

        let path = save_manifest(&manifest, temp_dir.path(), "proj")?;

        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with("-proj-snapshot.json"));
        let loaded = load_manifest(&path)?;
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.total_bytes(), 7);
        Ok(())
    }

    #[test]
    fn test_save_never_overwrites() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let first = create_snapshot_structure(Path::new("/one"));
        let second = create_snapshot_structure(Path::new("/two"));

        let a = save_manifest(&first, temp_dir.path(), "p")?;
        let b = save_manifest(&second, temp_dir.path(), "p")?;

        assert_ne!(a, b);
        assert_eq!(load_manifest(&a)?.source_root, "/one");
        assert_eq!(load_manifest(&b)?.source_root, "/two");
        // no hidden temporaries left behind
        assert_eq!(fs::read_dir(temp_dir.path())?.count(), 2);
        Ok(())
    }

    #[test]
    fn test_collision_suffix_keeps_json_extension() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let manifest = create_snapshot_structure(Path::new("/src"));
        let name = format!("{}-x-snapshot.json", timestamp());
        fs::write(temp_dir.path().join(&name), "{}")?;

        let path = save_manifest(&manifest, temp_dir.path(), "x")?;

        let saved = path.file_name().unwrap().to_string_lossy().to_string();
        assert_ne!(saved, name);
        assert!(saved.ends_with("-snapshot.json") || saved.ends_with("-snapshot-1.json"));
        assert_eq!(fs::read_to_string(temp_dir.path().join(&name))?, "{}");
        Ok(())
    }
}
