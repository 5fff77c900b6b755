//! Common error types for CipherDrop.

use thiserror::Error;

/// Top-level error type for CipherDrop operations.
///
/// Variants are split by remediation: `Unavailable` and `Io` are transient and
/// may be retried by the caller; every other variant is final for the inputs
/// that produced it.
#[derive(Debug, Error)]
pub enum Error {
    /// Key material did not have the canonical 256-bit length.
    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Ciphertext, tag and key do not match.
    #[error("Authentication failed: ciphertext or key is invalid")]
    AuthenticationFailure,

    /// Key, record or blob not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Share link deadline has passed.
    #[error("Share link has expired")]
    LinkExpired,

    /// Share link has no redemptions left.
    #[error("Share link has already been used the maximum number of times")]
    LinkExhausted,

    /// Transient storage or network failure.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Conflict detected.
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl Error {
    /// Whether the same call may succeed if repeated later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Unavailable(_) | Error::Io(_))
    }

    /// Message suitable for showing to the person using the link or file.
    ///
    /// Decryption failures and missing resources intentionally read
    /// differently: one means the wrong key, the other a wrong or dead link.
    pub fn user_message(&self) -> &'static str {
        match self {
            Error::InvalidKeyLength { .. } => {
                "The decryption key is malformed. Check that the full link was copied."
            }
            Error::AuthenticationFailure => {
                "The file could not be decrypted. The key does not match this file or the data was altered."
            }
            Error::NotFound(_) => "The requested file or link does not exist.",
            Error::LinkExpired => "This share link has expired.",
            Error::LinkExhausted => "This share link has already been used.",
            Error::Unavailable(_) | Error::Io(_) => {
                "Storage is temporarily unavailable. Please try again."
            }
            Error::InvalidInput(_) => "The request was invalid.",
            Error::Serialization(_) => "Stored data is corrupted or in an unknown format.",
            Error::Conflict(_) => "The resource was modified concurrently. Please try again.",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_errors_are_retryable() {
        assert!(Error::Unavailable("timeout".to_string()).is_retryable());
        assert!(Error::Io(std::io::Error::other("disk")).is_retryable());

        assert!(!Error::AuthenticationFailure.is_retryable());
        assert!(!Error::LinkExpired.is_retryable());
        assert!(!Error::LinkExhausted.is_retryable());
        assert!(!Error::InvalidKeyLength { expected: 32, actual: 31 }.is_retryable());
        assert!(!Error::NotFound("x".to_string()).is_retryable());
    }

    #[test]
    fn test_user_messages_are_distinct() {
        let errors = [
            Error::InvalidKeyLength { expected: 32, actual: 0 },
            Error::AuthenticationFailure,
            Error::NotFound("cid".to_string()),
            Error::LinkExpired,
            Error::LinkExhausted,
            Error::Unavailable("down".to_string()),
        ];

        let messages: std::collections::HashSet<_> =
            errors.iter().map(|e| e.user_message()).collect();
        assert_eq!(messages.len(), errors.len());
    }

    #[test]
    fn test_decrypt_failure_not_reported_as_missing() {
        let auth = Error::AuthenticationFailure.user_message();
        let missing = Error::NotFound("cid".to_string()).user_message();
        assert_ne!(auth, missing);
        assert!(!auth.contains("does not exist"));
    }
}
