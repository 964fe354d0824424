use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};

use crate::models::EntityType;

/// Content-addressed storage for record images.
///
/// Blobs live at `<root>/assets/<entity>/<sha256>`; a `<key>.ref` file next
/// to them names the blob currently attached to each record.
#[derive(Debug, Clone)]
pub struct AssetStore {
    root: PathBuf,
}

impl AssetStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: data_dir.into().join("assets"),
        }
    }

    fn entity_dir(&self, entity_type: EntityType) -> PathBuf {
        self.root.join(entity_type.as_str())
    }

    /// Stores the bytes and points `key` at them, returning the blob path.
    pub async fn store(&self, entity_type: EntityType, key: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        let dir = self.entity_dir(entity_type);
        tokio::fs::create_dir_all(&dir).await?;

        let digest = format!("{:x}", Sha256::digest(bytes));
        let blob = dir.join(&digest);
        if !tokio::fs::try_exists(&blob).await? {
            tokio::fs::write(&blob, bytes).await?;
        }
        tokio::fs::write(ref_path(&dir, key), &digest).await?;
        Ok(blob)
    }

    /// Blob currently attached to `key`, if any.
    pub async fn lookup(&self, entity_type: EntityType, key: &str) -> io::Result<Option<PathBuf>> {
        let dir = self.entity_dir(entity_type);
        match tokio::fs::read_to_string(ref_path(&dir, key)).await {
            Ok(digest) => Ok(Some(dir.join(digest.trim()))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn ref_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{}.ref", urlencoding::encode(key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_store_is_content_addressed() {
        let temp_dir = TempDir::new().unwrap();
        let store = AssetStore::new(temp_dir.path());

        let a = store.store(EntityType::Item, "1", b"png-bytes").await.unwrap();
        let b = store.store(EntityType::Item, "2", b"png-bytes").await.unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with(temp_dir.path().join("assets").join("item")));
        let name = a.file_name().unwrap().to_str().unwrap().to_string();
        assert_eq!(
            name,
            "ea80334363eed145dfeee51ebae7dc3f1cd7d0c7879f8bfd2070c061d3c33f56"
        );

        assert_eq!(store.lookup(EntityType::Item, "1").await.unwrap(), Some(a));
        assert_eq!(store.lookup(EntityType::Item, "3").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_replaces_reference() {
        let temp_dir = TempDir::new().unwrap();
        let store = AssetStore::new(temp_dir.path());

        store.store(EntityType::Customer, "c/1", b"old").await.unwrap();
        let new = store.store(EntityType::Customer, "c/1", b"new").await.unwrap();
        assert_eq!(
            store.lookup(EntityType::Customer, "c/1").await.unwrap(),
            Some(new.clone())
        );
        assert_eq!(tokio::fs::read(new).await.unwrap(), b"new");
    }
}
