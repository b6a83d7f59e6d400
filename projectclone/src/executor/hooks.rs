//! User-configured shell hooks around a vault snapshot.

use crate::{Result, VaultError};
use serde::{Deserialize, Serialize};
use std::process::Command;
use tracing::{debug, info};

/// Shell commands run before and after a snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Hooks {
    #[serde(default)]
    pub pre_snapshot: Option<String>,

    #[serde(default)]
    pub post_snapshot: Option<String>,
}

impl Hooks {
    pub fn run_pre(&self) -> Result<()> {
        match &self.pre_snapshot {
            Some(command) => run_hook("pre_snapshot", command),
            None => Ok(()),
        }
    }

    pub fn run_post(&self) -> Result<()> {
        match &self.post_snapshot {
            Some(command) => run_hook("post_snapshot", command),
            None => Ok(()),
        }
    }
}

/// Run `command` through `sh -c`. A non-zero exit is a [`VaultError::Hook`].
pub fn run_hook(name: &str, command: &str) -> Result<()> {
    info!(hook = name, "Running hook");

    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .output()
        .map_err(|e| VaultError::Hook {
            name: name.to_string(),
            message: format!("failed to start: {e}"),
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
        debug!(hook = name, output = %stdout.trim(), "Hook output");
    }

    if !output.status.success() {
        return Err(VaultError::Hook {
            name: name.to_string(),
            message: format!(
                "exited with {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_successful_hook() {
        assert!(run_hook("pre_snapshot", "true").is_ok());
    }

    #[test]
    fn test_failing_hook_reports_stderr() {
        let err = run_hook("post_snapshot", "echo broken >&2; exit 3").unwrap_err();
        match err {
            VaultError::Hook { name, message } => {
                assert_eq!(name, "post_snapshot");
                assert!(message.contains("Some(3)"));
                assert!(message.contains("broken"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unset_hooks_are_noops() {
        let hooks = Hooks::default();
        assert!(hooks.run_pre().is_ok());
        assert!(hooks.run_post().is_ok());
    }
}
