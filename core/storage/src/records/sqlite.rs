//! SQLite-backed record store.
//!
//! Every table lives in one `records` table keyed by `(tbl, pk)` with the
//! record body stored as JSON text. Predicates are evaluated in process, so
//! select/update/delete scan the rows of a single table.

use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use super::{apply_patch, check_patch, MetadataStore, Predicate, Record, Table};
use cipherdrop_common::{Error, Result};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS records (
        tbl TEXT NOT NULL,
        pk TEXT NOT NULL,
        body TEXT NOT NULL,
        PRIMARY KEY (tbl, pk)
    );
"#;

/// Record store persisted in a SQLite database.
#[derive(Clone)]
pub struct SqliteMetadataStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMetadataStore {
    /// Create or open a record database.
    ///
    /// # Errors
    /// - `Unavailable` if the database cannot be opened or migrated
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref()).map_err(map_sqlite)?;
        conn.execute_batch(SCHEMA).map_err(map_sqlite)?;

        info!(path = %db_path.as_ref().display(), "Record store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(map_sqlite)?;
        conn.execute_batch(SCHEMA).map_err(map_sqlite)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| Error::Unavailable("record store lock poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| Error::Unavailable(format!("Record store task failed: {}", e)))?
    }
}

fn map_sqlite(err: rusqlite::Error) -> Error {
    Error::Unavailable(format!("SQLite error: {}", err))
}

fn encode(record: &Record) -> Result<String> {
    Ok(serde_json::to_string(record)?)
}

fn decode(body: &str) -> Result<Record> {
    Ok(serde_json::from_str(body)?)
}

/// Load every `(pk, record)` of a table.
fn load_table(conn: &Connection, table: Table) -> Result<Vec<(String, Record)>> {
    let mut stmt = conn
        .prepare("SELECT pk, body FROM records WHERE tbl = ?1 ORDER BY pk")
        .map_err(map_sqlite)?;

    let rows = stmt
        .query_map([table.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(map_sqlite)?;

    let mut out = Vec::new();
    for row in rows {
        let (pk, body) = row.map_err(map_sqlite)?;
        out.push((pk, decode(&body)?));
    }
    Ok(out)
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn insert(&self, table: Table, record: Record) -> Result<()> {
        let pk = table.primary_key(&record)?;
        let body = encode(&record)?;

        self.with_conn(move |conn| {
            let result = conn.execute(
                "INSERT INTO records (tbl, pk, body) VALUES (?1, ?2, ?3)",
                params![table.as_str(), pk, body],
            );
            match result {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Err(Error::Conflict(format!(
                        "Record '{}' already exists in '{}'",
                        pk, table
                    )))
                }
                Err(e) => Err(map_sqlite(e)),
            }
        })
        .await
    }

    async fn select(&self, table: Table, predicate: &Predicate) -> Result<Vec<Record>> {
        let predicate = predicate.clone();
        self.with_conn(move |conn| {
            // Fast path for primary key lookups.
            if let [cond] = predicate.conditions() {
                if cond.field == table.key_field() && cond.op == super::Op::Eq {
                    if let Some(pk) = cond.value.as_str() {
                        let body: Option<String> = conn
                            .query_row(
                                "SELECT body FROM records WHERE tbl = ?1 AND pk = ?2",
                                params![table.as_str(), pk],
                                |row| row.get(0),
                            )
                            .optional()
                            .map_err(map_sqlite)?;
                        return body.map(|b| decode(&b)).into_iter().collect();
                    }
                }
            }

            Ok(load_table(conn, table)?
                .into_iter()
                .map(|(_, r)| r)
                .filter(|r| predicate.matches(r))
                .collect())
        })
        .await
    }

    async fn update(&self, table: Table, predicate: &Predicate, patch: Record) -> Result<u64> {
        check_patch(table, &patch)?;
        let predicate = predicate.clone();

        self.with_conn(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(map_sqlite)?;

            let mut updated = 0;
            for (pk, mut record) in load_table(&tx, table)? {
                if !predicate.matches(&record) {
                    continue;
                }
                apply_patch(&mut record, &patch);
                tx.execute(
                    "UPDATE records SET body = ?3 WHERE tbl = ?1 AND pk = ?2",
                    params![table.as_str(), pk, encode(&record)?],
                )
                .map_err(map_sqlite)?;
                updated += 1;
            }

            tx.commit().map_err(map_sqlite)?;
            debug!(table = %table, updated, "Records updated");
            Ok(updated)
        })
        .await
    }

    async fn delete(&self, table: Table, predicate: &Predicate) -> Result<u64> {
        let predicate = predicate.clone();

        self.with_conn(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(map_sqlite)?;

            let mut deleted = 0;
            for (pk, record) in load_table(&tx, table)? {
                if predicate.matches(&record) {
                    tx.execute(
                        "DELETE FROM records WHERE tbl = ?1 AND pk = ?2",
                        params![table.as_str(), pk],
                    )
                    .map_err(map_sqlite)?;
                    deleted += 1;
                }
            }

            tx.commit().map_err(map_sqlite)?;
            Ok(deleted)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let store = SqliteMetadataStore::in_memory().unwrap();
        store
            .insert(
                Table::Files,
                record(json!({"cid": "Qm1", "file_name": "a.txt", "file_size": 3})),
            )
            .await
            .unwrap();

        let rows = store
            .select(Table::Files, &Predicate::all().eq("cid", "Qm1"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["file_size"], 3);

        let missing = store
            .select(Table::Files, &Predicate::all().eq("cid", "Qm2"))
            .await
            .unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_insert_conflicts() {
        let store = SqliteMetadataStore::in_memory().unwrap();
        let r = record(json!({"id": "l1"}));

        store.insert(Table::ShareLinks, r.clone()).await.unwrap();
        assert!(matches!(
            store.insert(Table::ShareLinks, r).await,
            Err(Error::Conflict(_))
        ));
        // Same key in a different table is fine.
        store
            .insert(Table::Files, record(json!({"cid": "l1"})))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_update_with_guard() {
        let store = SqliteMetadataStore::in_memory().unwrap();
        store
            .insert(
                Table::ShareLinks,
                record(json!({"id": "l1", "access_count": 0, "max_access_count": 2})),
            )
            .await
            .unwrap();

        let guard = Predicate::all().eq("id", "l1").eq("access_count", 0);
        let n = store
            .update(Table::ShareLinks, &guard, record(json!({"access_count": 1})))
            .await
            .unwrap();
        assert_eq!(n, 1);

        let n = store
            .update(Table::ShareLinks, &guard, record(json!({"access_count": 1})))
            .await
            .unwrap();
        assert_eq!(n, 0);

        let rows = store.select(Table::ShareLinks, &Predicate::all()).await.unwrap();
        assert_eq!(rows[0]["access_count"], 1);
        assert_eq!(rows[0]["max_access_count"], 2);
    }

    #[tokio::test]
    async fn test_update_rejects_key_patch() {
        let store = SqliteMetadataStore::in_memory().unwrap();
        let result = store
            .update(Table::Files, &Predicate::all(), record(json!({"cid": "x"})))
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_delete_by_range() {
        let store = SqliteMetadataStore::in_memory().unwrap();
        for (id, expires) in [("a", 100), ("b", 200), ("c", 300)] {
            store
                .insert(Table::ShareLinks, record(json!({"id": id, "expires_at": expires})))
                .await
                .unwrap();
        }

        let n = store
            .delete(Table::ShareLinks, &Predicate::all().le("expires_at", 200))
            .await
            .unwrap();
        assert_eq!(n, 2);

        let rest = store.select(Table::ShareLinks, &Predicate::all()).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0]["id"], "c");
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records.db");

        {
            let store = SqliteMetadataStore::open(&path).unwrap();
            store
                .insert(Table::Files, record(json!({"cid": "Qm1"})))
                .await
                .unwrap();
        }

        let store = SqliteMetadataStore::open(&path).unwrap();
        let rows = store.select(Table::Files, &Predicate::all()).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_guarded_updates() {
        let store = SqliteMetadataStore::in_memory().unwrap();
        store
            .insert(Table::ShareLinks, record(json!({"id": "l1", "access_count": 0})))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let guard = Predicate::all().eq("id", "l1").eq("access_count", 0);
                store
                    .update(Table::ShareLinks, &guard, record(json!({"access_count": 1})))
                    .await
                    .unwrap()
            }));
        }

        let mut total = 0;
        for h in handles {
            total += h.await.unwrap();
        }
        assert_eq!(total, 1);
    }
}
