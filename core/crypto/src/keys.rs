//! Key types with secure memory handling.
//!
//! `KeyMaterial` is the only key representation in CipherDrop. Raw bytes and
//! hex text are converted explicitly at the edges; nothing accepts "either".

use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use cipherdrop_common::{Error, Result};

/// Length of encryption keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Length of the hex encoding of a key.
pub const KEY_HEX_LENGTH: usize = KEY_LENGTH * 2;

/// 256-bit symmetric key for file encryption.
///
/// Zeroized on drop. `Debug` output is redacted and equality is constant-time.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    key: [u8; KEY_LENGTH],
}

impl KeyMaterial {
    /// Generate a fresh key from the operating system CSPRNG.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LENGTH];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// Create a key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Create a key from a byte slice.
    ///
    /// # Errors
    /// - `InvalidKeyLength` unless `bytes` is exactly KEY_LENGTH long
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_LENGTH {
            return Err(Error::InvalidKeyLength {
                expected: KEY_LENGTH,
                actual: bytes.len(),
            });
        }
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(bytes);
        Ok(Self { key })
    }

    /// Parse a key from its hex encoding.
    ///
    /// # Preconditions
    /// - `s` is exactly KEY_HEX_LENGTH hexadecimal characters (either case)
    ///
    /// # Errors
    /// - `InvalidKeyLength` if the text does not encode exactly 32 bytes
    /// - `InvalidInput` if the text has the right length but is not hex
    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != KEY_HEX_LENGTH {
            return Err(Error::InvalidKeyLength {
                expected: KEY_LENGTH,
                actual: s.len() / 2,
            });
        }

        let mut key = [0u8; KEY_LENGTH];
        hex::decode_to_slice(s, &mut key)
            .map_err(|e| Error::InvalidInput(format!("Key is not valid hex: {}", e)))?;
        Ok(Self { key })
    }

    /// Lowercase hex encoding of the key.
    ///
    /// # Security
    /// The returned string is key material; never log it.
    pub fn to_hex(&self) -> String {
        hex::encode(self.key)
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl PartialEq for KeyMaterial {
    fn eq(&self, other: &Self) -> bool {
        self.key.ct_eq(&other.key).into()
    }
}

impl Eq for KeyMaterial {}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_produces_distinct_keys() {
        let key1 = KeyMaterial::generate();
        let key2 = KeyMaterial::generate();

        assert_ne!(key1, key2);
    }

    #[test]
    fn test_hex_roundtrip() {
        let key = KeyMaterial::generate();
        let hex = key.to_hex();

        assert_eq!(hex.len(), KEY_HEX_LENGTH);
        assert_eq!(KeyMaterial::from_hex(&hex).unwrap(), key);
    }

    #[test]
    fn test_from_hex_accepts_uppercase() {
        let key = KeyMaterial::from_bytes([0xAB; KEY_LENGTH]);
        let upper = key.to_hex().to_uppercase();

        assert_eq!(KeyMaterial::from_hex(&upper).unwrap(), key);
    }

    #[test]
    fn test_from_hex_boundary_lengths() {
        for len in [0usize, 31, 33, 64] {
            let hex = "ab".repeat(len);
            match KeyMaterial::from_hex(&hex) {
                Err(Error::InvalidKeyLength { expected, actual }) => {
                    assert_eq!(expected, KEY_LENGTH);
                    assert_eq!(actual, len);
                }
                other => panic!("length {} should be rejected, got {:?}", len, other),
            }
        }

        assert!(KeyMaterial::from_hex(&"ab".repeat(32)).is_ok());
    }

    #[test]
    fn test_from_hex_rejects_legacy_32_char_passphrase() {
        // 32 printable characters is a 16-byte key, not a 256-bit one.
        let result = KeyMaterial::from_hex("abcdefghijklmnopqrstuvwxyz012345");
        assert!(matches!(result, Err(Error::InvalidKeyLength { actual: 16, .. })));
    }

    #[test]
    fn test_from_hex_rejects_non_hex() {
        let bad = "zz".repeat(32);
        assert!(matches!(KeyMaterial::from_hex(&bad), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_from_slice_length_check() {
        assert!(KeyMaterial::from_slice(&[0u8; 32]).is_ok());
        assert!(matches!(
            KeyMaterial::from_slice(&[0u8; 16]),
            Err(Error::InvalidKeyLength { expected: 32, actual: 16 })
        ));
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = KeyMaterial::from_bytes([0x11; KEY_LENGTH]);
        let debug = format!("{:?}", key);

        assert!(!debug.contains("11"));
        assert!(debug.contains("REDACTED"));
    }
}
