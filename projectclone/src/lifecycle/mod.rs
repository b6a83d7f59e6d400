//! Run lifecycle: temporary-path bookkeeping and signal-driven cancellation.

pub mod cleanup;
pub mod shutdown;

pub use cleanup::CleanupRegistry;
pub use shutdown::ShutdownCoordinator;

use crate::{Result, VaultError};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What every transaction needs from the surrounding run: where to register
/// its temporaries and how to learn that the run was cancelled.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub registry: Arc<CleanupRegistry>,
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new(registry: Arc<CleanupRegistry>, cancel: CancellationToken) -> Self {
        Self { registry, cancel }
    }

    /// Safe point: between files and right before a commit.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(VaultError::Cancelled)
        } else {
            Ok(())
        }
    }
}
