//! Per-device key custody.
//!
//! Keys are stored per content identifier as hex text. A missing key is a
//! hard `NotFound`: the vault never derives, synthesizes, or falls back to a
//! shared key.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info};
use zeroize::Zeroizing;

use cipherdrop_common::{ContentId, Error, Result};
use cipherdrop_crypto::KeyMaterial;

/// Persistent mapping from content identifier to key material.
#[async_trait]
pub trait KeyVault: Send + Sync {
    /// Persist the key for `cid`. An existing key is overwritten.
    async fn store(&self, cid: &ContentId, key: &KeyMaterial) -> Result<()>;

    /// Fetch the key for `cid`.
    ///
    /// # Errors
    /// - `NotFound` if no key was stored for `cid`
    /// - `InvalidKeyLength` if the stored text is not a 256-bit key
    async fn fetch(&self, cid: &ContentId) -> Result<KeyMaterial>;

    /// Forget the key for `cid`.
    ///
    /// # Returns
    /// Whether a key was present.
    async fn remove(&self, cid: &ContentId) -> Result<bool>;
}

/// Key vault backed by a local SQLite database.
#[derive(Clone)]
pub struct SqliteKeyVault {
    conn: Arc<Mutex<Connection>>,
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS vault_keys (
        content_id TEXT PRIMARY KEY,
        key_hex TEXT NOT NULL
    );
"#;

impl SqliteKeyVault {
    /// Create or open a key database.
    ///
    /// # Errors
    /// - `Unavailable` if the database cannot be opened or migrated
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref()).map_err(map_sqlite)?;
        conn.execute_batch(SCHEMA).map_err(map_sqlite)?;

        info!(path = %db_path.as_ref().display(), "Key vault opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory key database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(map_sqlite)?;
        conn.execute_batch(SCHEMA).map_err(map_sqlite)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| Error::Unavailable("key vault lock poisoned".to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| Error::Unavailable(format!("Key vault task failed: {}", e)))?
    }
}

fn map_sqlite(err: rusqlite::Error) -> Error {
    Error::Unavailable(format!("Key vault database error: {}", err))
}

#[async_trait]
impl KeyVault for SqliteKeyVault {
    async fn store(&self, cid: &ContentId, key: &KeyMaterial) -> Result<()> {
        let id = cid.as_str().to_string();
        let key_hex = Zeroizing::new(key.to_hex());

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO vault_keys (content_id, key_hex) VALUES (?1, ?2)",
                params![id, key_hex.as_str()],
            )
            .map_err(map_sqlite)?;
            Ok(())
        })
        .await?;

        debug!(cid = %cid, "Stored key");
        Ok(())
    }

    async fn fetch(&self, cid: &ContentId) -> Result<KeyMaterial> {
        let id = cid.as_str().to_string();
        let key_hex: Option<Zeroizing<String>> = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT key_hex FROM vault_keys WHERE content_id = ?1",
                    [id],
                    |row| row.get::<_, String>(0),
                )
                .optional()
                .map(|v| v.map(Zeroizing::new))
                .map_err(map_sqlite)
            })
            .await?;

        match key_hex {
            Some(hex) => KeyMaterial::from_hex(&hex),
            None => Err(Error::NotFound(format!("No key stored for {}", cid))),
        }
    }

    async fn remove(&self, cid: &ContentId) -> Result<bool> {
        let id = cid.as_str().to_string();
        let removed = self
            .with_conn(move |conn| {
                conn.execute("DELETE FROM vault_keys WHERE content_id = ?1", [id])
                    .map_err(map_sqlite)
            })
            .await?;
        Ok(removed > 0)
    }
}

/// In-memory key vault for testing.
#[derive(Default)]
pub struct MemoryKeyVault {
    keys: RwLock<HashMap<ContentId, KeyMaterial>>,
}

impl MemoryKeyVault {
    /// Create an empty vault.
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> Error {
        Error::Unavailable("key vault lock poisoned".to_string())
    }
}

#[async_trait]
impl KeyVault for MemoryKeyVault {
    async fn store(&self, cid: &ContentId, key: &KeyMaterial) -> Result<()> {
        let mut keys = self.keys.write().map_err(|_| Self::poisoned())?;
        keys.insert(cid.clone(), key.clone());
        Ok(())
    }

    async fn fetch(&self, cid: &ContentId) -> Result<KeyMaterial> {
        let keys = self.keys.read().map_err(|_| Self::poisoned())?;
        keys.get(cid)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("No key stored for {}", cid)))
    }

    async fn remove(&self, cid: &ContentId) -> Result<bool> {
        let mut keys = self.keys.write().map_err(|_| Self::poisoned())?;
        Ok(keys.remove(cid).is_some())
    }
}
