//! Common utilities and types shared across CipherDrop modules.
//!
//! This module provides the error taxonomy and the identifier types used by
//! the crypto, storage, vault and share layers.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{ContentId, LinkId};
