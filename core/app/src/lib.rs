//! Application layer for CipherDrop.
//!
//! Loads [`AppConfig`] and wires the content store, record store, key vault,
//! file service and share link service into an [`AppContext`].

pub mod config;
pub mod context;

pub use config::{AppConfig, ContentStoreConfig, ShareConfig, PINATA_JWT_ENV};
pub use context::AppContext;
