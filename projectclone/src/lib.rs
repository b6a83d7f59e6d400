//! projectclone library
//!
//! Atomic, deduplicated local snapshots of a project directory: full
//! copies, `.tar.gz` archives, content-addressed vault snapshots and
//! rsync-based incremental trees.

pub mod config;
pub mod executor;
pub mod fs;
pub mod lifecycle;
pub mod transfer;
pub mod utils;
pub mod vault;

// Re-export commonly used types
pub use config::Config;
pub use executor::{BackupExecutor, BackupJob, BackupResult, Strategy};
pub use lifecycle::RunContext;
pub use utils::errors::{Result, VaultError};
