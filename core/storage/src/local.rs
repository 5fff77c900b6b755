//! Local filesystem content store.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::provider::{derive_content_id, ContentStore};
use cipherdrop_common::{ContentId, Error, Result};

/// Local filesystem content store.
///
/// Stores each blob as a flat file named by its content identifier.
pub struct LocalContentStore {
    root: PathBuf,
}

impl LocalContentStore {
    /// Create a new local store with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied or invalid path
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self { root })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, cid: &ContentId) -> PathBuf {
        self.root.join(cid.as_str())
    }
}

fn not_found_or_io(err: std::io::Error, cid: &ContentId) -> Error {
    if err.kind() == ErrorKind::NotFound {
        Error::NotFound(format!("Blob not found: {}", cid))
    } else {
        Error::Io(err)
    }
}

#[async_trait]
impl ContentStore for LocalContentStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn put(&self, data: Vec<u8>, _name_hint: Option<&str>) -> Result<ContentId> {
        let cid = derive_content_id(&data)?;
        let path = self.blob_path(&cid);

        if fs::try_exists(&path).await? {
            debug!(cid = %cid, "Blob already present");
            return Ok(cid);
        }

        // Write to a temp file and rename so readers never see a partial blob.
        let tmp = self.root.join(format!(".{}.tmp", Uuid::new_v4()));
        fs::write(&tmp, &data).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(cid = %cid, size = data.len(), "Stored blob on disk");
        Ok(cid)
    }

    async fn get(&self, cid: &ContentId) -> Result<Vec<u8>> {
        fs::read(self.blob_path(cid))
            .await
            .map_err(|e| not_found_or_io(e, cid))
    }

    async fn remove(&self, cid: &ContentId) -> Result<()> {
        fs::remove_file(self.blob_path(cid))
            .await
            .map_err(|e| not_found_or_io(e, cid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get() {
        let dir = TempDir::new().unwrap();
        let store = LocalContentStore::new(dir.path()).unwrap();

        let cid = store.put(b"ciphertext".to_vec(), None).await.unwrap();
        assert_eq!(store.get(&cid).await.unwrap(), b"ciphertext");
        assert!(dir.path().join(cid.as_str()).exists());
    }

    #[tokio::test]
    async fn test_creates_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("nested").join("blobs");

        let store = LocalContentStore::new(&root).unwrap();
        assert!(store.root().is_dir());
    }

    #[tokio::test]
    async fn test_missing_blob_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = LocalContentStore::new(dir.path()).unwrap();
        let cid = ContentId::new("Qm123").unwrap();

        assert!(matches!(store.get(&cid).await, Err(Error::NotFound(_))));
        assert!(matches!(store.remove(&cid).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_remove() {
        let dir = TempDir::new().unwrap();
        let store = LocalContentStore::new(dir.path()).unwrap();

        let cid = store.put(vec![1, 2, 3], None).await.unwrap();
        store.remove(&cid).await.unwrap();

        assert!(matches!(store.get(&cid).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = LocalContentStore::new(dir.path()).unwrap();

        let a = store.put(vec![7; 64], None).await.unwrap();
        let b = store.put(vec![7; 64], None).await.unwrap();

        assert_eq!(a, b);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
