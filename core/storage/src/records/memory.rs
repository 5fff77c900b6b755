//! In-memory record store for testing.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use super::{apply_patch, check_patch, MetadataStore, Predicate, Record, Table};
use cipherdrop_common::{Error, Result};

/// In-memory record store.
///
/// A single lock guards all tables, so every call is atomic. Can be switched
/// into an outage mode to exercise `Unavailable` handling.
pub struct MemoryMetadataStore {
    tables: RwLock<HashMap<Table, BTreeMap<String, Record>>>,
    unavailable: AtomicBool,
}

impl MemoryMetadataStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulate an outage: every call fails with `Unavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Unavailable("record store is offline".to_string()));
        }
        Ok(())
    }

    fn poisoned() -> Error {
        Error::Unavailable("record store lock poisoned".to_string())
    }
}

impl Default for MemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn insert(&self, table: Table, record: Record) -> Result<()> {
        self.check_available()?;
        let key = table.primary_key(&record)?;

        let mut tables = self.tables.write().map_err(|_| Self::poisoned())?;
        let rows = tables.entry(table).or_default();
        if rows.contains_key(&key) {
            return Err(Error::Conflict(format!(
                "Record '{}' already exists in '{}'",
                key, table
            )));
        }
        rows.insert(key, record);
        Ok(())
    }

    async fn select(&self, table: Table, predicate: &Predicate) -> Result<Vec<Record>> {
        self.check_available()?;
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;

        Ok(tables
            .get(&table)
            .map(|rows| {
                rows.values()
                    .filter(|r| predicate.matches(r))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update(&self, table: Table, predicate: &Predicate, patch: Record) -> Result<u64> {
        self.check_available()?;
        check_patch(table, &patch)?;

        let mut tables = self.tables.write().map_err(|_| Self::poisoned())?;
        let Some(rows) = tables.get_mut(&table) else {
            return Ok(0);
        };

        let mut updated = 0;
        for record in rows.values_mut().filter(|r| predicate.matches(r)) {
            apply_patch(record, &patch);
            updated += 1;
        }
        Ok(updated)
    }

    async fn delete(&self, table: Table, predicate: &Predicate) -> Result<u64> {
        self.check_available()?;

        let mut tables = self.tables.write().map_err(|_| Self::poisoned())?;
        let Some(rows) = tables.get_mut(&table) else {
            return Ok(0);
        };

        let before = rows.len();
        rows.retain(|_, r| !predicate.matches(r));
        Ok((before - rows.len()) as u64)
    }
}
