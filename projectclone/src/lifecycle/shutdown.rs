//! Cancellation on SIGTERM and SIGINT.
//!
//! On a signal the coordinator:
//! - cancels the run's token so the pipeline unwinds at its next safe point
//! - sweeps the cleanup registry
//! - leaves the non-zero exit to the caller once the pipeline has returned

use crate::lifecycle::cleanup::CleanupRegistry;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Exit status of a run terminated by a signal.
pub const CANCELLED_EXIT_CODE: i32 = 130;

/// Shutdown coordinator
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    cancel: CancellationToken,
    registry: Arc<CleanupRegistry>,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator sweeping `registry` on signal
    pub fn new(registry: Arc<CleanupRegistry>) -> Self {
        Self {
            cancel: CancellationToken::new(),
            registry,
        }
    }

    /// Token observed by the pipeline
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for SIGINT or SIGTERM, then cancel and sweep.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        let name = tokio::select! {
            _ = ctrl_c => "SIGINT",
            _ = terminate => "SIGTERM",
        };

        self.handle_signal(name);
    }

    /// Cancel the run and remove every registered temporary.
    /// Returns the number of temporaries removed.
    pub fn handle_signal(&self, name: &str) -> usize {
        self.cancel.cancel();
        let removed = self.registry.cleanup();
        warn!(signal = name, removed, "Signal received, cleaning up temporary files");
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_shutdown_coordinator() {
        let coordinator = ShutdownCoordinator::new(Arc::new(CleanupRegistry::new()));
        let token = coordinator.token();

        let handle = tokio::spawn(async move {
            token.cancelled().await;
        });

        coordinator.handle_signal("SIGINT");

        handle.await.unwrap();
        assert!(coordinator.is_cancelled());
    }

    #[test]
    fn test_signal_sweeps_registry() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let registry = Arc::new(CleanupRegistry::new());
        let tmp = temp_dir.path().join(".record.tmp-1");
        fs::create_dir(&tmp)?;
        fs::write(tmp.join("partial"), b"half")?;
        registry.register_dir(&tmp);

        let coordinator = ShutdownCoordinator::new(Arc::clone(&registry));
        assert_eq!(coordinator.handle_signal("SIGTERM"), 1);

        assert!(!tmp.exists());
        assert!(registry.is_empty());
        Ok(())
    }
}
