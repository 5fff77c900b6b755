//! Wiring of stores and services from configuration.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use url::Url;

use crate::config::AppConfig;
use cipherdrop_common::{ContentId, Result};
use cipherdrop_share::{IssuedLink, ShareLinkService};
use cipherdrop_storage::{
    create_default_registry, ContentStore, MemoryContentStore, MemoryMetadataStore,
    MetadataStore, SqliteMetadataStore,
};
use cipherdrop_vault::{FileService, KeyVault, MemoryKeyVault, SqliteKeyVault};

/// Fully wired application services.
pub struct AppContext {
    config: AppConfig,
    vault: Arc<dyn KeyVault>,
    files: FileService,
    links: Arc<ShareLinkService>,
}

impl AppContext {
    /// Open the stores named by `config`.
    ///
    /// # Postconditions
    /// - `data_dir` exists and holds the record and key databases
    /// - The content store is resolved through the store registry
    ///
    /// # Errors
    /// - `InvalidInput` if the configuration is invalid
    /// - `Unavailable` if a database cannot be opened
    pub fn open(config: AppConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir)?;

        let registry = create_default_registry()?;
        let content = registry.resolve(&config.content_store.provider, config.store_config())?;
        let records: Arc<dyn MetadataStore> =
            Arc::new(SqliteMetadataStore::open(config.records_db_path())?);
        let vault: Arc<dyn KeyVault> = Arc::new(SqliteKeyVault::open(config.keys_db_path())?);

        info!(
            data_dir = %config.data_dir.display(),
            store = content.name(),
            "Application context opened"
        );
        Self::wire(config, content, records, vault)
    }

    /// Context over in-memory stores (for testing).
    pub fn in_memory(config: AppConfig) -> Result<Self> {
        config.validate()?;
        Self::wire(
            config,
            Arc::new(MemoryContentStore::new()),
            Arc::new(MemoryMetadataStore::new()),
            Arc::new(MemoryKeyVault::new()),
        )
    }

    fn wire(
        config: AppConfig,
        content: Arc<dyn ContentStore>,
        records: Arc<dyn MetadataStore>,
        vault: Arc<dyn KeyVault>,
    ) -> Result<Self> {
        let base_url: Url = config.share.parsed_base_url()?;
        let links = Arc::new(ShareLinkService::new(records.clone(), content.clone(), base_url));
        let files =
            FileService::new(content, records, vault.clone()).with_link_revoker(links.clone());

        Ok(Self {
            config,
            vault,
            files,
            links,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// File pipeline.
    pub fn files(&self) -> &FileService {
        &self.files
    }

    /// Share link service.
    pub fn links(&self) -> &ShareLinkService {
        &self.links
    }

    /// Issue a share link for an uploaded file using the locally held key.
    ///
    /// `ttl` and `max_access_count` fall back to the configured defaults.
    ///
    /// # Errors
    /// - `NotFound` if the file or its vault key is missing
    pub async fn share_file(
        &self,
        cid: &ContentId,
        ttl: Option<Duration>,
        max_access_count: Option<u32>,
    ) -> Result<IssuedLink> {
        let record = self.files.get(cid).await?;
        let key = self.vault.fetch(cid).await?;

        let ttl = ttl.unwrap_or(Duration::from_secs(self.config.share.default_ttl_secs));
        let max = max_access_count.unwrap_or(self.config.share.default_max_access_count);

        self.links
            .create_link(cid, record.nonce, &key, ttl, max)
            .await
    }
}
