//! Key custody and the encrypted file pipeline for CipherDrop.
//!
//! - [`KeyVault`]: per-device store of one key per content identifier
//! - [`FileService`]: encrypt-and-upload, download-and-decrypt, listing and
//!   deletion of files
//!
//! Keys never leave this crate except in an [`UploadReceipt`], which the
//! caller uses to issue share links.

pub mod files;
pub mod keyvault;
pub mod records;

pub use files::{FileService, LinkRevoker, UploadReceipt};
pub use keyvault::{KeyVault, MemoryKeyVault, SqliteKeyVault};
pub use records::FileRecord;
