//! Utility modules shared by the pipeline.

pub mod errors;
pub mod hash;
pub mod logger;
pub mod naming;

pub use errors::{Result, VaultError};
