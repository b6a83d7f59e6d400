//! Retention of backup records.
//!
//! A record is any entry directly under the destination whose name is
//! `<YYYY-MM-DD_HHMMSS>-<project>[-<note>][.<ext>]`. Hidden entries
//! (in-flight temporaries) and `.sha256` sidecars are never records; a
//! sidecar is removed together with its archive.
//!
//! Names do not delimit the project from the note, so rotating `web` also
//! selects `<ts>-web-app-<note>` records of a project called `web-app`.
//! Such removals are logged as ambiguous.

use crate::utils::naming::{TIMESTAMP_FORMAT, TIMESTAMP_LEN};
use crate::Result;
use chrono::NaiveDateTime;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};

const SIDECAR_EXTENSION: &str = ".sha256";

/// Record extensions that follow the uniqueness suffix.
const RECORD_EXTENSIONS: &[&str] = &[".tar.gz", ".json"];

#[derive(Debug, Clone)]
struct Record {
    path: PathBuf,
    name: String,
    timestamp: NaiveDateTime,
    modified: Option<SystemTime>,
    suffix: u64,
    ambiguous: bool,
}

/// Timestamp embedded in `name` if it is a record of `project`.
pub fn parse_record(name: &str, project: &str) -> Option<NaiveDateTime> {
    if name.starts_with('.') || name.ends_with(SIDECAR_EXTENSION) {
        return None;
    }
    if name.len() < TIMESTAMP_LEN || !name.is_char_boundary(TIMESTAMP_LEN) {
        return None;
    }

    let (stamp, rest) = name.split_at(TIMESTAMP_LEN);
    let timestamp = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;

    let rest = rest.strip_prefix('-')?;
    let tail = rest.strip_prefix(project)?;
    if tail.is_empty() || tail.starts_with('-') || tail.starts_with('.') {
        Some(timestamp)
    } else {
        None
    }
}

fn records(dest_root: &Path, project: &str) -> Result<Vec<Record>> {
    let entries = match fs::read_dir(dest_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut records = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(timestamp) = parse_record(&name, project) {
            let modified = entry.metadata().and_then(|m| m.modified()).ok();
            let tail = &name[TIMESTAMP_LEN + 1 + project.len()..];
            records.push(Record {
                path: entry.path(),
                suffix: unique_suffix(tail),
                ambiguous: tail.trim_start_matches('-').contains('-'),
                name,
                timestamp,
                modified,
            });
        }
    }

    // Newest first. Records from the same second are ordered by mtime, then
    // by uniqueness suffix (`x-10` after `x-9`), then name.
    records.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| b.modified.cmp(&a.modified))
            .then_with(|| b.suffix.cmp(&a.suffix))
            .then_with(|| b.name.cmp(&a.name))
    });
    Ok(records)
}

/// Delete every record of `project` beyond the `keep` newest.
///
/// `keep == 0` disables rotation. Returns the removed paths; a record that
/// cannot be removed is logged and left in place.
pub fn rotate_backups(dest_root: &Path, keep: usize, project: &str) -> Result<Vec<PathBuf>> {
    if keep == 0 {
        return Ok(Vec::new());
    }

    let records = records(dest_root, project)?;
    if records.len() <= keep {
        return Ok(Vec::new());
    }

    let mut removed = Vec::new();
    for record in &records[keep..] {
        if record.ambiguous {
            warn!(
                path = %record.path.display(),
                project,
                "Removing record whose name may belong to a hyphenated project"
            );
        }
        match remove_record(&record.path) {
            Ok(()) => {
                info!(path = %record.path.display(), "Removed old backup");
                removed.push(record.path.clone());
            }
            Err(e) => warn!(path = %record.path.display(), error = %e, "Failed to remove old backup"),
        }
    }

    Ok(removed)
}

/// Newest record of `project` that is a directory, used as the hard-link
/// base for incremental copies.
pub fn latest_backup(dest_root: &Path, project: &str) -> Result<Option<PathBuf>> {
    Ok(records(dest_root, project)?
        .into_iter()
        .find(|r| fs::symlink_metadata(&r.path).map(|m| m.is_dir()).unwrap_or(false))
        .map(|r| r.path))
}

/// The `-<n>` added by `make_unique_path`, 0 when absent.
fn unique_suffix(tail: &str) -> u64 {
    let stem = RECORD_EXTENSIONS
        .iter()
        .find_map(|ext| tail.strip_suffix(ext))
        .unwrap_or(tail);
    stem.rsplit_once('-')
        .and_then(|(_, n)| n.parse().ok())
        .unwrap_or(0)
}

fn remove_record(path: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
        let mut sidecar = path.as_os_str().to_owned();
        sidecar.push(SIDECAR_EXTENSION);
        match fs::remove_file(PathBuf::from(sidecar)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Local};
    use tempfile::TempDir;

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_parse_record() {
        assert!(parse_record("2025-01-01_000000-proj-note", "proj").is_some());
        assert!(parse_record("2025-01-01_000000-proj", "proj").is_some());
        assert!(parse_record("2025-01-01_000000-proj-note.tar.gz", "proj").is_some());
        assert!(parse_record("2025-01-01_000000-proj-snapshot.json", "proj").is_some());
        assert!(parse_record("2025-01-01_000000-project-note", "proj").is_none());
        assert!(parse_record("2025-01-01_000000-other-note", "proj").is_none());
        assert!(parse_record("2025-01-01_000000-proj-note.tar.gz.sha256", "proj").is_none());
        assert!(parse_record(".2025-01-01_000000-proj-note.tmp-1", "proj").is_none());
        assert!(parse_record("backup_2025-01-01_000000_proj.log", "proj").is_none());
        assert!(parse_record("2025-13-01_000000-proj-note", "proj").is_none());
    }

    #[test]
    fn test_rotate_backups() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let dest = temp_dir.path();
        let older = (Local::now() - Duration::seconds(60)).format(TIMESTAMP_FORMAT);
        let newer = Local::now().format(TIMESTAMP_FORMAT);
        let dir1 = dest.join(format!("{older}-testproj-note1"));
        fs::create_dir(&dir1)?;
        let file2 = dest.join(format!("{newer}-testproj-note2.tar.gz"));
        fs::write(&file2, b"")?;

        rotate_backups(dest, 1, "testproj")?;
        assert!(!dir1.exists());
        assert!(file2.exists());

        rotate_backups(dest, 0, "testproj")?;
        assert!(file2.exists());
        Ok(())
    }

    #[test]
    fn test_rotate_keep_zero_and_one() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let base = temp_dir.path();
        for i in 0..4 {
            fs::create_dir(base.join(format!("2025-10-{:02}_123456-proj-{i}", 10 + i)))?;
        }

        assert!(rotate_backups(base, 0, "proj")?.is_empty());
        assert_eq!(names(base).len(), 4);

        rotate_backups(base, 1, "proj")?;
        assert_eq!(names(base), vec!["2025-10-13_123456-proj-3"]);
        Ok(())
    }

    #[test]
    fn test_rotate_deletes_files_and_dirs() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let base = temp_dir.path();
        fs::create_dir(base.join("2025-01-01_000000-proj-note-0"))?;
        fs::write(base.join("2025-01-01_000000-proj-note-0/inner"), b"x")?;
        fs::create_dir(base.join("2025-01-02_000000-proj-note-1"))?;
        fs::write(base.join("2025-01-03_000000-proj-note-2.tar.gz"), b"")?;

        let removed = rotate_backups(base, 1, "proj")?;

        assert_eq!(removed.len(), 2);
        assert_eq!(names(base), vec!["2025-01-03_000000-proj-note-2.tar.gz"]);
        Ok(())
    }

    #[test]
    fn test_sidecars_follow_their_archive() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let base = temp_dir.path();
        for day in 1..=3 {
            let archive = format!("2025-02-0{day}_000000-proj-n.tar.gz");
            fs::write(base.join(&archive), b"a")?;
            fs::write(base.join(format!("{archive}.sha256")), b"h")?;
        }

        rotate_backups(base, 2, "proj")?;

        assert_eq!(
            names(base),
            vec![
                "2025-02-02_000000-proj-n.tar.gz",
                "2025-02-02_000000-proj-n.tar.gz.sha256",
                "2025-02-03_000000-proj-n.tar.gz",
                "2025-02-03_000000-proj-n.tar.gz.sha256",
            ]
        );
        Ok(())
    }

    #[test]
    fn test_other_entries_untouched() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let base = temp_dir.path();
        fs::create_dir(base.join("2025-01-01_000000-proj-a"))?;
        fs::create_dir(base.join("2025-01-02_000000-proj-b"))?;
        fs::create_dir(base.join("2025-01-01_000000-other-a"))?;
        fs::create_dir(base.join(".2025-01-01_000000-proj-a.tmp-xyz"))?;
        fs::write(base.join("notes.txt"), b"")?;

        rotate_backups(base, 1, "proj")?;

        assert_eq!(
            names(base),
            vec![
                ".2025-01-01_000000-proj-a.tmp-xyz",
                "2025-01-01_000000-other-a",
                "2025-01-02_000000-proj-b",
                "notes.txt",
            ]
        );
        Ok(())
    }

    #[test]
    fn test_missing_destination_is_not_an_error() -> Result<()> {
        let temp_dir = TempDir::new()?;
        assert!(rotate_backups(&temp_dir.path().join("absent"), 3, "proj")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_latest_backup_prefers_newest_directory() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let base = temp_dir.path();
        fs::create_dir(base.join("2025-01-01_000000-proj-a"))?;
        fs::create_dir(base.join("2025-01-02_000000-proj-b"))?;
        fs::write(base.join("2025-01-03_000000-proj-c.tar.gz"), b"")?;

        assert_eq!(
            latest_backup(base, "proj")?,
            Some(base.join("2025-01-02_000000-proj-b"))
        );
        assert_eq!(latest_backup(base, "none")?, None);
        Ok(())
    }

    #[test]
    fn test_same_second_orders_by_numeric_suffix() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let base = temp_dir.path();
        let stamp = filetime::FileTime::from_unix_time(1_700_000_000, 0);
        for name in ["2025-03-01_000000-proj-n", "2025-03-01_000000-proj-n-9", "2025-03-01_000000-proj-n-10"] {
            fs::create_dir(base.join(name))?;
            filetime::set_file_mtime(base.join(name), stamp)?;
        }

        rotate_backups(base, 1, "proj")?;

        assert_eq!(names(base), vec!["2025-03-01_000000-proj-n-10"]);
        Ok(())
    }

    #[test]
    fn test_unique_suffix() {
        assert_eq!(unique_suffix("-note"), 0);
        assert_eq!(unique_suffix("-note-10"), 10);
        assert_eq!(unique_suffix("-note-3.tar.gz"), 3);
        assert_eq!(unique_suffix("-snapshot-2.json"), 2);
        assert_eq!(unique_suffix(""), 0);
    }

    #[test]
    fn test_hyphenated_project_records_are_selected() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let base = temp_dir.path();
        fs::create_dir(base.join("2025-01-01_000000-web-app-release"))?;
        fs::create_dir(base.join("2025-01-02_000000-web-home"))?;

        // the name cannot tell project `web` apart from `web-app`
        let removed = rotate_backups(base, 1, "web")?;

        assert_eq!(removed, vec![base.join("2025-01-01_000000-web-app-release")]);
        assert_eq!(rotate_backups(base, 1, "web-app")?.len(), 0);
        Ok(())
    }
}
