//! Authenticated encryption using AES-256-GCM.
//!
//! Every encryption draws a fresh 96-bit nonce from the OS RNG. Decryption
//! verifies the tag before any plaintext is released.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce as GcmNonce,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::keys::KeyMaterial;
use cipherdrop_common::{Error, Result};

/// Nonce size for AES-GCM (12 bytes).
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Per-encryption nonce.
///
/// Not secret. Stored next to the ciphertext reference and serialized as hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Nonce([u8; NONCE_SIZE]);

impl Nonce {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse from hex.
    ///
    /// # Errors
    /// - `InvalidInput` unless the text decodes to exactly NONCE_SIZE bytes
    pub fn from_hex(s: &str) -> Result<Self> {
        let mut bytes = [0u8; NONCE_SIZE];
        hex::decode_to_slice(s.trim(), &mut bytes)
            .map_err(|e| Error::InvalidInput(format!("Invalid nonce '{}': {}", s, e)))?;
        Ok(Self(bytes))
    }

    /// Lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Get the nonce bytes.
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce({})", self.to_hex())
    }
}

impl Serialize for Nonce {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Nonce {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Nonce::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Output of a single encryption: the nonce and `ciphertext || tag`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    nonce: Nonce,
    ciphertext: Vec<u8>,
}

impl EncryptedEnvelope {
    /// Assemble an envelope from a stored nonce and ciphertext.
    pub fn new(nonce: Nonce, ciphertext: Vec<u8>) -> Self {
        Self { nonce, ciphertext }
    }

    /// The nonce used for this encryption.
    pub fn nonce(&self) -> &Nonce {
        &self.nonce
    }

    /// Ciphertext with the authentication tag appended.
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Split into nonce and ciphertext.
    pub fn into_parts(self) -> (Nonce, Vec<u8>) {
        (self.nonce, self.ciphertext)
    }

    /// Serialize as `nonce || ciphertext || tag`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_SIZE + self.ciphertext.len());
        out.extend_from_slice(self.nonce.as_bytes());
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parse the `nonce || ciphertext || tag` layout.
    ///
    /// # Errors
    /// - `AuthenticationFailure` if the input is too short to hold a nonce and tag
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < NONCE_SIZE + TAG_SIZE {
            return Err(Error::AuthenticationFailure);
        }
        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_SIZE);
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(nonce_bytes);
        Ok(Self {
            nonce: Nonce(nonce),
            ciphertext: ciphertext.to_vec(),
        })
    }
}

fn cipher(key: &KeyMaterial) -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()))
}

/// Encrypt plaintext using AES-256-GCM.
///
/// # Postconditions
/// - Returns an envelope with a freshly generated random nonce
/// - Ciphertext length is plaintext length + TAG_SIZE
///
/// # Errors
/// - `InvalidInput` if the plaintext exceeds the AES-GCM message limit
pub fn encrypt(key: &KeyMaterial, plaintext: &[u8]) -> Result<EncryptedEnvelope> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher(key)
        .encrypt(&nonce, plaintext)
        .map_err(|_| Error::InvalidInput("Plaintext too large for AES-GCM".to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    nonce_bytes.copy_from_slice(&nonce);

    Ok(EncryptedEnvelope {
        nonce: Nonce(nonce_bytes),
        ciphertext,
    })
}

/// Decrypt an envelope using AES-256-GCM.
///
/// # Postconditions
/// - Returns the original plaintext only if the tag verifies
///
/// # Errors
/// - `AuthenticationFailure` on wrong key, truncated, corrupted or tampered input
pub fn decrypt(key: &KeyMaterial, envelope: &EncryptedEnvelope) -> Result<Vec<u8>> {
    if envelope.ciphertext.len() < TAG_SIZE {
        return Err(Error::AuthenticationFailure);
    }

    let nonce = GcmNonce::from_slice(envelope.nonce.as_bytes());

    cipher(key)
        .decrypt(nonce, envelope.ciphertext.as_slice())
        .map_err(|_| Error::AuthenticationFailure)
}
