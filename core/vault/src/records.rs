//! File metadata records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cipherdrop_common::{ContentId, Result};
use cipherdrop_crypto::Nonce;
use cipherdrop_storage::{from_record, to_record, Record};

/// Metadata of an uploaded file.
///
/// Holds what is needed to fetch and decrypt the blob except the key, which
/// lives only in the key vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Content identifier of the ciphertext blob.
    pub cid: ContentId,
    /// Nonce used to encrypt the blob.
    pub nonce: Nonce,
    /// Original file name.
    pub file_name: String,
    /// Plaintext size in bytes.
    pub file_size: u64,
    /// MIME type reported at upload.
    pub mime_type: String,
    /// Upload time.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub uploaded_at: DateTime<Utc>,
}

impl FileRecord {
    /// Encode as a store record.
    pub fn to_record(&self) -> Result<Record> {
        to_record(self)
    }

    /// Decode from a store record.
    pub fn from_record(record: Record) -> Result<Self> {
        from_record(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_layout() {
        let record = FileRecord {
            cid: ContentId::new("Qm123").unwrap(),
            nonce: Nonce::from_bytes([7; 12]),
            file_name: "report.pdf".to_string(),
            file_size: 2048,
            mime_type: "application/pdf".to_string(),
            uploaded_at: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
        };

        let encoded = record.to_record().unwrap();
        assert_eq!(encoded["cid"], "Qm123");
        assert_eq!(encoded["nonce"], "070707070707070707070707");
        assert_eq!(encoded["uploaded_at"], 1_700_000_000_000i64);
        assert!(!encoded.contains_key("key"));

        assert_eq!(FileRecord::from_record(encoded).unwrap(), record);
    }

    #[test]
    fn test_rejects_bad_nonce() {
        let mut encoded = FileRecord {
            cid: ContentId::new("Qm123").unwrap(),
            nonce: Nonce::from_bytes([0; 12]),
            file_name: "a".to_string(),
            file_size: 1,
            mime_type: "text/plain".to_string(),
            uploaded_at: Utc::now(),
        }
        .to_record()
        .unwrap();
        encoded.insert("nonce".to_string(), "zz".into());

        assert!(FileRecord::from_record(encoded).is_err());
    }
}
