//! Configuration management.
//!
//! Loads an optional TOML file; every field has a default and command-line
//! flags override whatever the file sets.

use crate::executor::hooks::Hooks;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backup: BackupConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub hooks: Hooks,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Destination root (vault root for vault snapshots)
    #[serde(default = "default_dest")]
    pub dest: PathBuf,

    /// Records kept per project, 0 disables rotation
    #[serde(default)]
    pub keep: usize,

    /// Extra exclude patterns
    #[serde(default)]
    pub excludes: Vec<String>,

    #[serde(default)]
    pub manifest: bool,

    #[serde(default)]
    pub manifest_sha: bool,

    #[serde(default)]
    pub preserve_symlinks: bool,

    #[serde(default = "default_true")]
    pub show_progress: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Write `backup_<timestamp>_<project>.log` into the destination
    #[serde(default = "default_true")]
    pub file: bool,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dest: default_dest(),
            keep: 0,
            excludes: Vec::new(),
            manifest: false,
            manifest_sha: false,
            preserve_symlinks: false,
            show_progress: true,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: true,
        }
    }
}

fn default_dest() -> PathBuf {
    home_dir().join("project_backups")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home_dir().join(rest),
        Err(_) => path.to_path_buf(),
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.backup.dest = expand_home(&config.backup.dest);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.backup.dest.ends_with("project_backups"));
        assert_eq!(config.backup.keep, 0);
        assert!(config.backup.show_progress);
        assert_eq!(config.log.level, "info");
        assert!(config.hooks.pre_snapshot.is_none());
    }

    #[test]
    fn test_from_file_with_partial_sections() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("projectclone.toml");
        fs::write(
            &path,
            r#"
[backup]
dest = "/srv/backups"
keep = 5
excludes = ["node_modules", "*.log"]

[hooks]
pre_snapshot = "make clean"
"#,
        )?;

        let config = Config::from_file(&path)?;

        assert_eq!(config.backup.dest, PathBuf::from("/srv/backups"));
        assert_eq!(config.backup.keep, 5);
        assert_eq!(config.backup.excludes, vec!["node_modules", "*.log"]);
        assert!(!config.backup.manifest);
        assert!(config.log.file);
        assert_eq!(config.hooks.pre_snapshot.as_deref(), Some("make clean"));
        assert!(config.hooks.post_snapshot.is_none());
        Ok(())
    }

    #[test]
    fn test_invalid_file_is_an_error() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("bad.toml");
        fs::write(&path, "[backup]\nkeep = \"many\"\n")?;
        assert!(Config::from_file(&path).is_err());
        Ok(())
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home(Path::new("/abs/path")), PathBuf::from("/abs/path"));
        assert!(expand_home(Path::new("~/backups")).ends_with("backups"));
        assert!(!expand_home(Path::new("~/backups")).starts_with("~"));
    }
}
