//! Record store abstraction for file metadata and share links.
//!
//! The record store is a generic table store: callers insert JSON records and
//! address them with simple field predicates. `update` must apply its
//! predicate and patch as one atomic step; share-link redemption relies on
//! this to implement compare-and-swap on the access counter.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;

use cipherdrop_common::{Error, Result};

pub use memory::MemoryMetadataStore;
pub use sqlite::SqliteMetadataStore;

/// A stored record: a JSON object.
pub type Record = Map<String, Value>;

/// Tables known to the record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    /// Uploaded file metadata, keyed by `cid`.
    Files,
    /// Capability links, keyed by `id`.
    ShareLinks,
    /// Markers left behind by expired or exhausted links, keyed by `id`.
    SpentLinks,
}

impl Table {
    /// All tables.
    pub const ALL: [Table; 3] = [Table::Files, Table::ShareLinks, Table::SpentLinks];

    /// Table name in the backing store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Files => "files",
            Table::ShareLinks => "share_links",
            Table::SpentLinks => "spent_links",
        }
    }

    /// Field holding the primary key.
    pub fn key_field(&self) -> &'static str {
        match self {
            Table::Files => "cid",
            Table::ShareLinks | Table::SpentLinks => "id",
        }
    }

    /// Extract the primary key of a record for this table.
    ///
    /// # Errors
    /// - `InvalidInput` if the key field is missing or not a scalar
    pub fn primary_key(&self, record: &Record) -> Result<String> {
        match record.get(self.key_field()) {
            Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            _ => Err(Error::InvalidInput(format!(
                "Record for table '{}' is missing key field '{}'",
                self.as_str(),
                self.key_field()
            ))),
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Comparison operator of a predicate condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A single `field <op> value` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: Op,
    pub value: Value,
}

impl Condition {
    fn matches(&self, record: &Record) -> bool {
        let Some(actual) = record.get(&self.field) else {
            return false;
        };
        let ordering = compare_values(actual, &self.value);
        match self.op {
            Op::Eq => ordering == Some(Ordering::Equal),
            Op::Ne => ordering != Some(Ordering::Equal),
            Op::Lt => ordering == Some(Ordering::Less),
            Op::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
            Op::Gt => ordering == Some(Ordering::Greater),
            Op::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        }
    }
}

/// Conjunction of conditions. The empty predicate matches every record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    conditions: Vec<Condition>,
}

impl Predicate {
    /// Predicate matching every record.
    pub fn all() -> Self {
        Self::default()
    }

    fn with(mut self, field: &str, op: Op, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition {
            field: field.to_string(),
            op,
            value: value.into(),
        });
        self
    }

    /// Add `field == value`.
    pub fn eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(field, Op::Eq, value)
    }

    /// Add `field != value`.
    pub fn ne(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(field, Op::Ne, value)
    }

    /// Add `field < value`.
    pub fn lt(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(field, Op::Lt, value)
    }

    /// Add `field <= value`.
    pub fn le(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(field, Op::Le, value)
    }

    /// Add `field > value`.
    pub fn gt(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(field, Op::Gt, value)
    }

    /// Add `field >= value`.
    pub fn ge(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(field, Op::Ge, value)
    }

    /// Conditions of this predicate.
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Check whether a record satisfies every condition.
    pub fn matches(&self, record: &Record) -> bool {
        self.conditions.iter().all(|c| c.matches(record))
    }
}

/// Order two JSON scalars of the same kind. Mixed kinds are incomparable.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => {
            if a == b {
                Some(Ordering::Equal)
            } else {
                None
            }
        }
    }
}

/// Merge `patch` into `record`, overwriting existing fields.
pub(crate) fn apply_patch(record: &mut Record, patch: &Record) {
    for (k, v) in patch {
        record.insert(k.clone(), v.clone());
    }
}

/// Convert a serializable value into a record.
///
/// # Errors
/// - `Serialization` if the value is not a JSON object
pub fn to_record<T: serde::Serialize>(value: &T) -> Result<Record> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::Serialization(format!(
            "Expected a JSON object record, got {}",
            other
        ))),
    }
}

/// Convert a record back into a typed value.
pub fn from_record<T: serde::de::DeserializeOwned>(record: Record) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(record))?)
}

/// Generic record store.
///
/// Every call may fail with `Unavailable`; callers surface it.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Get the store name (e.g., "memory", "sqlite").
    fn name(&self) -> &str;

    /// Insert a new record.
    ///
    /// # Errors
    /// - `Conflict` if a record with the same primary key exists
    /// - `InvalidInput` if the record lacks its primary key
    async fn insert(&self, table: Table, record: Record) -> Result<()>;

    /// Return every record matching `predicate`.
    async fn select(&self, table: Table, predicate: &Predicate) -> Result<Vec<Record>>;

    /// Merge `patch` into every record matching `predicate`.
    ///
    /// Matching and patching happen as one atomic step with respect to all
    /// other calls on the same store. The primary key cannot be patched.
    ///
    /// # Returns
    /// Number of records updated.
    async fn update(&self, table: Table, predicate: &Predicate, patch: Record) -> Result<u64>;

    /// Delete every record matching `predicate`.
    ///
    /// # Returns
    /// Number of records deleted.
    async fn delete(&self, table: Table, predicate: &Predicate) -> Result<u64>;
}

/// Reject patches that would change a record's identity.
pub(crate) fn check_patch(table: Table, patch: &Record) -> Result<()> {
    if patch.contains_key(table.key_field()) {
        return Err(Error::InvalidInput(format!(
            "Cannot patch key field '{}' of table '{}'",
            table.key_field(),
            table
        )));
    }
    Ok(())
}
