//! In-memory content store for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;

use crate::provider::{derive_content_id, ContentStore};
use cipherdrop_common::{ContentId, Error, Result};

/// In-memory content store.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop. Can be switched into an outage mode to exercise
/// `Unavailable` handling.
pub struct MemoryContentStore {
    blobs: Arc<RwLock<HashMap<ContentId, Vec<u8>>>>,
    unavailable: AtomicBool,
}

impl MemoryContentStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            blobs: Arc::new(RwLock::new(HashMap::new())),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulate an outage: every call fails with `Unavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Unavailable("memory store is offline".to_string()));
        }
        Ok(())
    }

    fn poisoned() -> Error {
        Error::Unavailable("memory store lock poisoned".to_string())
    }
}

impl Default for MemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put(&self, data: Vec<u8>, _name_hint: Option<&str>) -> Result<ContentId> {
        self.check_available()?;
        let cid = derive_content_id(&data)?;
        debug!(cid = %cid, size = data.len(), "Storing blob in memory");

        self.blobs
            .write()
            .map_err(|_| Self::poisoned())?
            .insert(cid.clone(), data);
        Ok(cid)
    }

    async fn get(&self, cid: &ContentId) -> Result<Vec<u8>> {
        self.check_available()?;
        self.blobs
            .read()
            .map_err(|_| Self::poisoned())?
            .get(cid)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Blob not found: {}", cid)))
    }

    async fn remove(&self, cid: &ContentId) -> Result<()> {
        self.check_available()?;
        self.blobs
            .write()
            .map_err(|_| Self::poisoned())?
            .remove(cid)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("Blob not found: {}", cid)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get() {
        let store = MemoryContentStore::new();
        let data = b"Hello, World!".to_vec();

        let cid = store.put(data.clone(), None).await.unwrap();
        let fetched = store.get(&cid).await.unwrap();

        assert_eq!(fetched, data);
    }

    #[tokio::test]
    async fn test_same_content_same_cid() {
        let store = MemoryContentStore::new();

        let a = store.put(vec![1, 2, 3], Some("a.bin")).await.unwrap();
        let b = store.put(vec![1, 2, 3], Some("b.bin")).await.unwrap();

        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = MemoryContentStore::new();
        let cid = ContentId::new("Qm123").unwrap();

        assert!(matches!(store.get(&cid).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_remove() {
        let store = MemoryContentStore::new();
        let cid = store.put(vec![1, 2, 3], None).await.unwrap();

        store.remove(&cid).await.unwrap();
        assert!(store.is_empty());
        assert!(matches!(store.remove(&cid).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_outage_surfaces_unavailable() {
        let store = MemoryContentStore::new();
        let cid = store.put(vec![9], None).await.unwrap();

        store.set_unavailable(true);
        let err = store.get(&cid).await.unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
        assert!(err.is_retryable());

        store.set_unavailable(false);
        assert_eq!(store.get(&cid).await.unwrap(), vec![9]);
    }
}
