//! Durable persistence backends for the warm and cold tiers
//!
//! The store is backend-agnostic beyond this contract: named stores of
//! string keys to JSON values, failing with `StorageUnavailable` when the
//! backing medium is unreachable. SQLite is the default durable backend;
//! the in-memory backend exists for tests and ephemeral use.

use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::{EngineError, Result};

/// Contract every durable backend satisfies
pub trait WarmBackend: Send + Sync {
    /// Insert or replace an item (last write wins)
    fn put(&self, store: &str, key: &str, value: &Value) -> Result<()>;
    /// Fetch one item
    fn get(&self, store: &str, key: &str) -> Result<Option<Value>>;
    /// Fetch every item in a store, key order unspecified
    fn get_all(&self, store: &str) -> Result<Vec<(String, Value)>>;
    /// Remove an item; returns whether it existed
    fn delete(&self, store: &str, key: &str) -> Result<bool>;
    /// Number of items in a store
    fn count(&self, store: &str) -> Result<usize>;
}

// ============================================================================
// SQLITE BACKEND
// ============================================================================

/// SQLite-backed durable store
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open (or create) the backend at `path`, defaulting to the platform
    /// data directory
    pub fn new(db_path: Option<PathBuf>) -> Result<Self> {
        let path = match db_path {
            Some(p) => p,
            None => {
                let proj_dirs = ProjectDirs::from("io", "strata", "core").ok_or_else(|| {
                    EngineError::StorageUnavailable(
                        "could not determine project directories".to_string(),
                    )
                })?;
                let data_dir = proj_dirs.data_dir();
                std::fs::create_dir_all(data_dir).map_err(|e| {
                    EngineError::StorageUnavailable(format!("cannot create data dir: {}", e))
                })?;
                // Owner-only on unix
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    let perms = std::fs::Permissions::from_mode(0o700);
                    let _ = std::fs::set_permissions(data_dir, perms);
                }
                data_dir.join("strata.db")
            }
        };

        let conn = Connection::open(&path)?;
        Self::configure(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Fully in-memory SQLite database, handy for tests
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                store TEXT NOT NULL,
                key   TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (store, key)
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn configure(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;
             PRAGMA busy_timeout = 5000;
             CREATE TABLE IF NOT EXISTS kv (
                store TEXT NOT NULL,
                key   TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (store, key)
             );",
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| EngineError::StorageUnavailable("connection lock poisoned".to_string()))
    }
}

impl WarmBackend for SqliteBackend {
    fn put(&self, store: &str, key: &str, value: &Value) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO kv (store, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT (store, key) DO UPDATE SET value = excluded.value",
            params![store, key, serde_json::to_string(value)?],
        )?;
        Ok(())
    }

    fn get(&self, store: &str, key: &str) -> Result<Option<Value>> {
        let conn = self.lock()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM kv WHERE store = ?1 AND key = ?2",
                params![store, key],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(s) => Ok(Some(serde_json::from_str(&s).map_err(|e| {
                EngineError::CorruptData(format!("stored value is not valid json: {}", e))
            })?)),
            None => Ok(None),
        }
    }

    fn get_all(&self, store: &str) -> Result<Vec<(String, Value)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT key, value FROM kv WHERE store = ?1 ORDER BY key")?;
        let rows = stmt.query_map(params![store], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut items = Vec::new();
        for row in rows {
            let (key, raw) = row?;
            match serde_json::from_str(&raw) {
                Ok(value) => items.push((key, value)),
                Err(e) => {
                    tracing::warn!(store, key, "skipping unparseable stored value: {}", e);
                }
            }
        }
        Ok(items)
    }

    fn delete(&self, store: &str, key: &str) -> Result<bool> {
        let conn = self.lock()?;
        let affected = conn.execute(
            "DELETE FROM kv WHERE store = ?1 AND key = ?2",
            params![store, key],
        )?;
        Ok(affected > 0)
    }

    fn count(&self, store: &str) -> Result<usize> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM kv WHERE store = ?1",
            params![store],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }
}

// ============================================================================
// IN-MEMORY BACKEND
// ============================================================================

/// Hash-map backend for tests and ephemeral stores.
///
/// `set_unavailable(true)` makes every call fail with
/// `StorageUnavailable`, for exercising retry paths.
#[derive(Default)]
pub struct MemoryBackend {
    stores: Mutex<HashMap<String, BTreeMap<String, Value>>>,
    unavailable: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate backend outage
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EngineError::StorageUnavailable(
                "memory backend marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, BTreeMap<String, Value>>>> {
        self.stores
            .lock()
            .map_err(|_| EngineError::StorageUnavailable("store lock poisoned".to_string()))
    }
}

impl WarmBackend for MemoryBackend {
    fn put(&self, store: &str, key: &str, value: &Value) -> Result<()> {
        self.check()?;
        self.lock()?
            .entry(store.to_string())
            .or_default()
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    fn get(&self, store: &str, key: &str) -> Result<Option<Value>> {
        self.check()?;
        Ok(self
            .lock()?
            .get(store)
            .and_then(|s| s.get(key))
            .cloned())
    }

    fn get_all(&self, store: &str) -> Result<Vec<(String, Value)>> {
        self.check()?;
        Ok(self
            .lock()?
            .get(store)
            .map(|s| s.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    fn delete(&self, store: &str, key: &str) -> Result<bool> {
        self.check()?;
        Ok(self
            .lock()?
            .get_mut(store)
            .is_some_and(|s| s.remove(key).is_some()))
    }

    fn count(&self, store: &str) -> Result<usize> {
        self.check()?;
        Ok(self.lock()?.get(store).map(|s| s.len()).unwrap_or(0))
    }
}

/// Lets callers keep a handle to a shared backend (e.g. to toggle the
/// outage flag) after handing a boxed clone to the store
impl<B: WarmBackend> WarmBackend for std::sync::Arc<B> {
    fn put(&self, store: &str, key: &str, value: &Value) -> Result<()> {
        (**self).put(store, key, value)
    }

    fn get(&self, store: &str, key: &str) -> Result<Option<Value>> {
        (**self).get(store, key)
    }

    fn get_all(&self, store: &str) -> Result<Vec<(String, Value)>> {
        (**self).get_all(store)
    }

    fn delete(&self, store: &str, key: &str) -> Result<bool> {
        (**self).delete(store, key)
    }

    fn count(&self, store: &str) -> Result<usize> {
        (**self).count(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn exercise(backend: &dyn WarmBackend) {
        assert_eq!(backend.count("records").unwrap(), 0);
        backend.put("records", "a", &json!({"x": 1})).unwrap();
        backend.put("records", "a", &json!({"x": 2})).unwrap();
        backend.put("records", "b", &json!({"x": 3})).unwrap();
        backend.put("other", "a", &json!(true)).unwrap();

        assert_eq!(backend.count("records").unwrap(), 2);
        assert_eq!(backend.get("records", "a").unwrap(), Some(json!({"x": 2})));
        assert_eq!(backend.get("records", "missing").unwrap(), None);
        assert_eq!(backend.get_all("records").unwrap().len(), 2);

        assert!(backend.delete("records", "a").unwrap());
        assert!(!backend.delete("records", "a").unwrap());
        assert_eq!(backend.count("records").unwrap(), 1);
        // Namespaces are independent
        assert_eq!(backend.count("other").unwrap(), 1);
    }

    #[test]
    fn test_memory_backend_contract() {
        exercise(&MemoryBackend::new());
    }

    #[test]
    fn test_sqlite_backend_contract_in_memory() {
        exercise(&SqliteBackend::in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_backend_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteBackend::new(Some(dir.path().join("test.db"))).unwrap();
        exercise(&backend);
    }

    #[test]
    fn test_memory_backend_outage() {
        let backend = MemoryBackend::new();
        backend.put("records", "a", &json!(1)).unwrap();
        backend.set_unavailable(true);
        assert!(matches!(
            backend.get("records", "a").unwrap_err(),
            EngineError::StorageUnavailable(_)
        ));
        backend.set_unavailable(false);
        assert_eq!(backend.get("records", "a").unwrap(), Some(json!(1)));
    }
}
