//! Upload, download, listing and deletion of encrypted files.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::keyvault::KeyVault;
use crate::records::FileRecord;
use cipherdrop_common::{ContentId, Error, Result};
use cipherdrop_crypto::{decrypt, encrypt, EncryptedEnvelope, KeyMaterial};
use cipherdrop_storage::{ContentStore, MetadataStore, Predicate, Table};

/// Revokes capability links when the file they point to goes away.
#[async_trait]
pub trait LinkRevoker: Send + Sync {
    /// Delete every link bound to `cid`, returning how many were removed.
    async fn revoke_for_file(&self, cid: &ContentId) -> Result<u64>;
}

/// Result of a successful upload.
///
/// Carries a copy of the key so the uploader can issue a share link right
/// away. The key is also persisted in the vault.
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub record: FileRecord,
    pub key: KeyMaterial,
}

/// File pipeline over the content store, record store and key vault.
pub struct FileService {
    content: Arc<dyn ContentStore>,
    records: Arc<dyn MetadataStore>,
    vault: Arc<dyn KeyVault>,
    revoker: Option<Arc<dyn LinkRevoker>>,
}

impl FileService {
    /// Create a new file service.
    pub fn new(
        content: Arc<dyn ContentStore>,
        records: Arc<dyn MetadataStore>,
        vault: Arc<dyn KeyVault>,
    ) -> Self {
        Self {
            content,
            records,
            vault,
            revoker: None,
        }
    }

    /// Revoke links through `revoker` whenever a file is deleted.
    pub fn with_link_revoker(mut self, revoker: Arc<dyn LinkRevoker>) -> Self {
        self.revoker = Some(revoker);
        self
    }

    /// Encrypt and store a file.
    ///
    /// # Postconditions
    /// - Ciphertext is in the content store
    /// - A fresh key is stored in the vault under the returned CID
    /// - A `FileRecord` without the key is in the record store
    ///
    /// # Errors
    /// - `InvalidInput` if `file_name` is empty
    /// - `Unavailable` if any backing store fails
    pub async fn upload(
        &self,
        file_name: &str,
        mime_type: &str,
        plaintext: &[u8],
    ) -> Result<UploadReceipt> {
        if file_name.trim().is_empty() {
            return Err(Error::InvalidInput("File name cannot be empty".to_string()));
        }

        let key = KeyMaterial::generate();
        let (nonce, ciphertext) = encrypt(&key, plaintext)?.into_parts();

        let cid = self.content.put(ciphertext, Some(file_name)).await?;
        self.vault.store(&cid, &key).await?;

        let record = FileRecord {
            cid,
            nonce,
            file_name: file_name.to_string(),
            file_size: plaintext.len() as u64,
            mime_type: mime_type.to_string(),
            uploaded_at: Utc::now(),
        };
        self.records.insert(Table::Files, record.to_record()?).await?;

        info!(cid = %record.cid, size = record.file_size, "File uploaded");
        Ok(UploadReceipt { record, key })
    }

    /// Look up the record of an uploaded file.
    ///
    /// # Errors
    /// - `NotFound` if no record exists for `cid`
    pub async fn get(&self, cid: &ContentId) -> Result<FileRecord> {
        let rows = self
            .records
            .select(Table::Files, &Predicate::all().eq("cid", cid.as_str()))
            .await?;

        match rows.into_iter().next() {
            Some(row) => FileRecord::from_record(row),
            None => Err(Error::NotFound(format!("File not found: {}", cid))),
        }
    }

    /// Fetch and decrypt a file with the locally held key.
    ///
    /// # Errors
    /// - `NotFound` if the record, vault key, or blob is missing
    /// - `AuthenticationFailure` if the blob does not decrypt under the key
    pub async fn download(&self, cid: &ContentId) -> Result<(FileRecord, Vec<u8>)> {
        let record = self.get(cid).await?;
        let key = self.vault.fetch(cid).await?;
        let ciphertext = self.content.get(cid).await?;

        let plaintext = decrypt(&key, &EncryptedEnvelope::new(record.nonce, ciphertext))?;

        debug!(cid = %cid, size = plaintext.len(), "File downloaded");
        Ok((record, plaintext))
    }

    /// All file records, oldest first.
    pub async fn list(&self) -> Result<Vec<FileRecord>> {
        let mut files = self
            .records
            .select(Table::Files, &Predicate::all())
            .await?
            .into_iter()
            .map(FileRecord::from_record)
            .collect::<Result<Vec<_>>>()?;

        files.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at));
        Ok(files)
    }

    /// Delete a file: its links, blob, key and record.
    ///
    /// The record goes last, so a call interrupted by `Unavailable` can be
    /// repeated.
    ///
    /// # Errors
    /// - `NotFound` if the file was already deleted
    pub async fn delete(&self, cid: &ContentId) -> Result<()> {
        self.get(cid).await?;

        if let Some(revoker) = &self.revoker {
            let revoked = revoker.revoke_for_file(cid).await?;
            debug!(cid = %cid, revoked, "Revoked share links");
        }

        match self.content.remove(cid).await {
            Ok(()) => {}
            Err(Error::NotFound(_)) => warn!(cid = %cid, "Blob already gone"),
            Err(e) => return Err(e),
        }

        if !self.vault.remove(cid).await? {
            warn!(cid = %cid, "No vault key to remove");
        }

        let deleted = self
            .records
            .delete(Table::Files, &Predicate::all().eq("cid", cid.as_str()))
            .await?;
        if deleted == 0 {
            return Err(Error::NotFound(format!("File not found: {}", cid)));
        }

        info!(cid = %cid, "File deleted");
        Ok(())
    }
}
