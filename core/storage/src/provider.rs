//! Content store trait definition.

use async_trait::async_trait;
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

use cipherdrop_common::{ContentId, Result};

/// Content-addressed blob store.
///
/// Blobs are opaque (CipherDrop only ever stores ciphertext) and immutable.
/// The store derives the identifier; callers never choose it. Every call may
/// fail with `Unavailable`, which callers must surface rather than swallow.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Get the store name (e.g., "memory", "local", "pinata").
    fn name(&self) -> &str;

    /// Store a blob and return its content identifier.
    ///
    /// `name_hint` is passed to stores that keep a display name next to the
    /// pin. It never influences the identifier.
    ///
    /// # Errors
    /// - `Unavailable` on network or backend failure
    async fn put(&self, data: Vec<u8>, name_hint: Option<&str>) -> Result<ContentId>;

    /// Fetch a blob by content identifier.
    ///
    /// # Errors
    /// - `NotFound` if the store has no blob for `cid`
    /// - `Unavailable` on network or backend failure
    async fn get(&self, cid: &ContentId) -> Result<Vec<u8>>;

    /// Release a blob (unpin).
    ///
    /// # Errors
    /// - `NotFound` if the store has no blob for `cid`
    /// - `Unavailable` on network or backend failure
    async fn remove(&self, cid: &ContentId) -> Result<()>;
}

/// Derive a content identifier for stores that address blobs themselves.
///
/// Lowercase hex of the BLAKE2b-256 digest, prefixed with `b`.
pub fn derive_content_id(data: &[u8]) -> Result<ContentId> {
    let digest = Blake2b::<U32>::digest(data);
    ContentId::new(format!("b{}", hex::encode(digest)))
}
