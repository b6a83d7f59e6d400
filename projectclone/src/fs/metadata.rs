//! File metadata captured for snapshot manifests.

use std::fs;
use std::path::Path;
use std::time::SystemTime;

/// Metadata recorded for every file in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FileMetadata {
    /// File size in bytes
    pub size: u64,

    /// Last modified time (fractional seconds since Unix epoch)
    pub mtime: f64,

    /// Full `st_mode` (type and permission bits); 0 where unavailable
    pub mode: u32,
}

impl FileMetadata {
    /// Extract metadata from a file path, following symlinks.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = fs::metadata(path)?;

        let mtime = metadata
            .modified()?
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();

        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::MetadataExt;
            metadata.mode()
        };

        #[cfg(not(unix))]
        let mode = 0;

        Ok(Self {
            size: metadata.len(),
            mtime,
            mode,
        })
    }
}
