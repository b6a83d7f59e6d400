//! Logging configuration using tracing.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing::Subscriber;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging with the specified level.
///
/// When `log_file` is given, every event is also appended to that file
/// (without ANSI colors) so each run leaves a readable record next to its
/// backups.
pub fn init(level: &str, log_file: Option<&Path>) -> anyhow::Result<()> {
    subscriber(level, log_file)?.try_init()?;
    Ok(())
}

/// The subscriber [`init`] installs, for callers that scope it themselves.
pub fn subscriber(level: &str, log_file: Option<&Path>) -> anyhow::Result<impl Subscriber + Send + Sync + 'static> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    Ok(tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_events_reach_the_log_file() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("backup_run.log");

        tracing::subscriber::with_default(subscriber("info", Some(&path))?, || {
            tracing::info!("Starting backup for demo");
        });

        let logged = std::fs::read_to_string(&path)?;
        assert!(logged.contains("Starting backup for demo"));
        assert!(!logged.contains('\u{1b}'));
        Ok(())
    }
}
