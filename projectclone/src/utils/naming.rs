//! Naming of backup records and temporaries.
//!
//! Record names look like `<YYYY-MM-DD_HHMMSS>-<project>-<note>[-<n>]`; the
//! timestamp sorts lexicographically in chronological order.

use chrono::Local;
use std::path::{Path, PathBuf};

/// Format of the timestamp that prefixes every backup record.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H%M%S";

/// Length in bytes of a formatted [`TIMESTAMP_FORMAT`] value.
pub const TIMESTAMP_LEN: usize = 17;

/// Extensions that stay at the end of a name when a uniqueness suffix is added.
const COMPOUND_EXTENSIONS: &[&str] = &[".tar.gz.sha256", ".tar.gz", ".json"];

/// Current local time formatted as `YYYY-MM-DD_HHMMSS`.
pub fn timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Turn free text into a token safe for file names.
///
/// Anything outside `[A-Za-z0-9._-]` becomes `_`, runs of `_` collapse and
/// leading/trailing `_` are trimmed. An empty result falls back to `note`.
pub fn sanitize_token(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        let mapped = if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
            ch
        } else {
            '_'
        };
        if mapped == '_' && out.ends_with('_') {
            continue;
        }
        out.push(mapped);
    }

    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "note".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Project names keep only `[A-Za-z0-9_-]`; everything else becomes `_`.
pub fn sanitize_project(raw: &str) -> String {
    let safe: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    if safe.is_empty() {
        "project".to_string()
    } else {
        safe
    }
}

/// `<timestamp>-<project>-<note>`
pub fn backup_record_name(project: &str, note: &str) -> String {
    format!("{}-{}-{}", timestamp(), project, note)
}

/// Return `path` if nothing exists there, otherwise the first free
/// `name-1`, `name-2`, ... sibling. The returned path is not created.
pub fn make_unique_path(path: &Path) -> PathBuf {
    if !exists_no_follow(path) {
        return path.to_path_buf();
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let (stem, ext) = split_compound_extension(&file_name);
    let parent = path.parent().unwrap_or_else(|| Path::new(""));

    let mut n = 1u32;
    loop {
        let candidate = parent.join(format!("{stem}-{n}{ext}"));
        if !exists_no_follow(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Hidden sibling used while a transaction is in flight, e.g.
/// `.<name>.tmp-<uuid>`. Hidden names are never treated as backup records.
pub fn temp_sibling(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!(".{}.tmp-{}", name, uuid::Uuid::new_v4().simple()))
}

fn split_compound_extension(name: &str) -> (&str, &str) {
    for ext in COMPOUND_EXTENSIONS {
        if name.len() > ext.len() && name.ends_with(ext) {
            return name.split_at(name.len() - ext.len());
        }
    }
    (name, "")
}

fn exists_no_follow(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok()
}
