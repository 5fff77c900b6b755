//! Content store registry for resolving a store from configuration.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::local::LocalContentStore;
use crate::memory::MemoryContentStore;
use crate::pinata::{PinataConfig, PinataContentStore};
use crate::provider::ContentStore;
use cipherdrop_common::{Error, Result};

/// Factory function type for creating content stores.
pub type ContentStoreFactory =
    Box<dyn Fn(Value) -> Result<Arc<dyn ContentStore>> + Send + Sync>;

/// Registry of content store factories, keyed by provider name.
pub struct StoreRegistry {
    factories: HashMap<String, ContentStoreFactory>,
}

impl StoreRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a store factory.
    ///
    /// # Errors
    /// - `Conflict` if the name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: ContentStoreFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::Conflict(format!(
                "Content store '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Build a store by provider name and provider-specific configuration.
    ///
    /// # Errors
    /// - `NotFound` if no factory is registered under `name`
    /// - Whatever the factory returns for an invalid configuration
    pub fn resolve(&self, name: &str, config: Value) -> Result<Arc<dyn ContentStore>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            Error::NotFound(format!("Content store '{}' is not registered", name))
        })?;
        factory(config)
    }

    /// Registered provider names, sorted.
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a provider is registered.
    pub fn has_provider(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with the built-in stores: `memory`, `local` and `pinata`.
pub fn create_default_registry() -> Result<StoreRegistry> {
    let mut registry = StoreRegistry::new();

    registry.register(
        "memory",
        Box::new(|_config| Ok(Arc::new(MemoryContentStore::new()))),
    )?;

    registry.register(
        "local",
        Box::new(|config| {
            let root = config
                .get("root")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    Error::InvalidInput("Local store requires a 'root' path".to_string())
                })?;
            Ok(Arc::new(LocalContentStore::new(root)?))
        }),
    )?;

    registry.register(
        "pinata",
        Box::new(|config| {
            let config: PinataConfig = serde_json::from_value(config).map_err(|e| {
                Error::InvalidInput(format!("Invalid Pinata configuration: {}", e))
            })?;
            Ok(Arc::new(PinataContentStore::new(config)?))
        }),
    )?;

    Ok(registry)
}
