//! Cryptographic primitives for CipherDrop.
//!
//! This module provides:
//! - The canonical 256-bit `KeyMaterial` type with hex conversions
//! - Authenticated encryption using AES-256-GCM with random 96-bit nonces
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Decryption fails closed: no partial plaintext on tag mismatch

pub mod aead;
pub mod keys;

pub use aead::{decrypt, encrypt, EncryptedEnvelope, Nonce, NONCE_SIZE, TAG_SIZE};
pub use keys::{KeyMaterial, KEY_HEX_LENGTH, KEY_LENGTH};
