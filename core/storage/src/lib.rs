//! Storage abstractions for CipherDrop.
//!
//! Two independent stores back the application:
//! - a content store holding encrypted blobs addressed by content identifier
//!   (in-memory, local filesystem, or the Pinata pinning service)
//! - a record store holding file metadata and share links as JSON records
//!   (in-memory or SQLite)
//!
//! Neither store ever sees plaintext or key material.

pub mod local;
pub mod memory;
pub mod pinata;
pub mod provider;
pub mod records;
pub mod registry;
pub mod retry;

pub use local::LocalContentStore;
pub use memory::MemoryContentStore;
pub use pinata::{PinataConfig, PinataContentStore};
pub use provider::{derive_content_id, ContentStore};
pub use records::{
    from_record, to_record, MemoryMetadataStore, MetadataStore, Predicate, Record,
    SqliteMetadataStore, Table,
};
pub use registry::{create_default_registry, ContentStoreFactory, StoreRegistry};
pub use retry::Backoff;
