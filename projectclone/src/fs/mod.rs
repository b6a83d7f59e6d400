//! File system helpers: traversal, exclusion rules, metadata and permissions.

pub mod ignore;
pub mod metadata;
pub mod permissions;
pub mod walker;
