//! Content-addressed object store.
//!
//! Blobs live at `<objects>/<first 2 hex>/<remaining 62 hex>` of their
//! SHA-256. A blob is written through a hidden temporary in its shard
//! directory and renamed into place, so a name under `objects/` always
//! refers to complete content.

use crate::fs::permissions::clear_dangerous_bits;
use crate::lifecycle::CleanupRegistry;
use crate::utils::hash::sha256_of_file;
use crate::utils::naming::temp_sibling;
use crate::{Result, VaultError};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Result of storing one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub hash: String,

    /// False when the object was already present
    pub written: bool,
}

#[derive(Debug, Clone)]
pub struct ObjectStore {
    root: PathBuf,
    registry: Option<Arc<CleanupRegistry>>,
}

impl ObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            registry: None,
        }
    }

    /// Register in-flight blobs with `registry` so a sweep removes them.
    pub fn with_registry(mut self, registry: Arc<CleanupRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn object_path(&self, hash: &str) -> PathBuf {
        let (shard, rest) = hash.split_at(hash.len().min(2));
        self.root.join(shard).join(rest)
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.object_path(hash).is_file()
    }

    /// Hash `path` and copy it into the store unless the object exists.
    pub fn store(&self, path: &Path) -> Result<StoredObject> {
        let hash = sha256_of_file(path)?;
        let target = self.object_path(&hash);

        if target.is_file() {
            debug!(hash = %hash, "Object already present");
            return Ok(StoredObject { hash, written: false });
        }

        let shard = target.parent().unwrap_or(&self.root);
        fs::create_dir_all(shard)?;

        let tmp = temp_sibling(shard, &hash[2..]);
        if let Some(registry) = &self.registry {
            registry.register_file(&tmp);
        }

        let result = fs::copy(path, &tmp)
            .and_then(|_| clear_dangerous_bits(&tmp))
            .and_then(|_| fs::rename(&tmp, &target));

        match result {
            Ok(()) => {
                if let Some(registry) = &self.registry {
                    registry.unregister(&tmp);
                }
                debug!(hash = %hash, "Stored object");
                Ok(StoredObject { hash, written: true })
            }
            Err(e) => {
                match &self.registry {
                    Some(registry) => registry.discard(&tmp),
                    None => {
                        let _ = fs::remove_file(&tmp);
                    }
                }
                Err(VaultError::commit(target, e))
            }
        }
    }
}

/// Store `file_path` under `objects_root` and return its hash.
pub fn store_object(file_path: &Path, objects_root: &Path) -> Result<String> {
    Ok(ObjectStore::new(objects_root).store(file_path)?.hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn count_objects(root: &Path) -> usize {
        walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count()
    }

    #[test]
    fn test_store_object_layout() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let file = temp_dir.path().join("hello.txt");
        fs::write(&file, "hello")?;
        let objects = temp_dir.path().join("objects");

        let hash = store_object(&file, &objects)?;

        assert_eq!(hash, "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824");
        let stored = objects.join("2c").join(&hash[2..]);
        assert_eq!(fs::read_to_string(stored)?, "hello");
        Ok(())
    }

    #[test]
    fn test_store_is_idempotent() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let a = temp_dir.path().join("a.txt");
        let b = temp_dir.path().join("b.txt");
        fs::write(&a, "same content")?;
        fs::write(&b, "same content")?;
        let store = ObjectStore::new(temp_dir.path().join("objects"));

        let first = store.store(&a)?;
        let second = store.store(&b)?;

        assert!(first.written);
        assert!(!second.written);
        assert_eq!(first.hash, second.hash);
        assert_eq!(count_objects(store.root()), 1);
        Ok(())
    }

    #[test]
    fn test_missing_source_leaves_no_object() {
        let temp_dir = TempDir::new().unwrap();
        let store = ObjectStore::new(temp_dir.path().join("objects"));

        assert!(store.store(&temp_dir.path().join("nope")).is_err());
        assert!(!store.root().exists() || count_objects(store.root()) == 0);
    }

    #[test]
    fn test_registry_is_clean_after_store() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let file = temp_dir.path().join("f");
        fs::write(&file, "x")?;
        let registry = Arc::new(CleanupRegistry::new());
        let store = ObjectStore::new(temp_dir.path().join("objects")).with_registry(Arc::clone(&registry));

        let stored = store.store(&file)?;

        assert!(store.contains(&stored.hash));
        assert!(registry.is_empty());
        Ok(())
    }
}
