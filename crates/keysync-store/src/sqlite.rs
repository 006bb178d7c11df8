//! SQLite implementation of the BlobStore trait.
//!
//! Uses rusqlite with bundled SQLite, wrapped in async via
//! tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::BlobStore;

/// SQLite-based blob store.
///
/// Thread-safe via internal Mutex. All operations run on the blocking pool.
#[derive(Clone)]
pub struct SqliteBlobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBlobStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|e| {
                StoreError::Database(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
                    Some(format!("mutex poisoned: {}", e)),
                ))
            })?;
            f(&conn)
        })
        .await
        .map_err(|e| {
            StoreError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                Some(format!("spawn_blocking failed: {}", e)),
            ))
        })?
    }
}

#[async_trait]
impl BlobStore for SqliteBlobStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let namespace = namespace.to_string();
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT value FROM blobs WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn set(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
        let namespace = namespace.to_string();
        let key = key.to_string();
        let value = value.to_vec();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO blobs (namespace, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(namespace, key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at",
                params![namespace, key, value, migration::now_millis()],
            )?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, namespace: &str, key: &str) -> Result<()> {
        let namespace = namespace.to_string();
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM blobs WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
            )?;
            Ok(())
        })
        .await
    }

    async fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        let namespace = namespace.to_string();
        self.with_conn(move |conn| {
            let mut stmt =
                conn.prepare("SELECT key FROM blobs WHERE namespace = ?1 ORDER BY key")?;
            let keys = stmt
                .query_map(params![namespace], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(keys)
        })
        .await
    }

    async fn remove_namespace(&self, namespace: &str) -> Result<()> {
        let namespace = namespace.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM blobs WHERE namespace = ?1", params![namespace])?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::BlobStoreExt;

    #[tokio::test]
    async fn test_set_get_overwrite() {
        let store = SqliteBlobStore::open_memory().unwrap();
        store.set("ns", "k", b"v1").await.unwrap();
        store.set("ns", "k", b"v2").await.unwrap();
        assert_eq!(store.get("ns", "k").await.unwrap(), Some(b"v2".to_vec()));
        assert_eq!(store.get("ns", "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_keys_are_scoped_and_sorted() {
        let store = SqliteBlobStore::open_memory().unwrap();
        store.set("keyring/a", "public_keys", b"1").await.unwrap();
        store.set("keyring/a", "attributes", b"2").await.unwrap();
        store.set("keyring/b", "changelog", b"3").await.unwrap();

        assert_eq!(
            store.keys("keyring/a").await.unwrap(),
            vec!["attributes", "public_keys"]
        );

        store.remove_namespace("keyring/a").await.unwrap();
        assert!(store.keys("keyring/a").await.unwrap().is_empty());
        assert_eq!(store.keys("keyring/b").await.unwrap(), vec!["changelog"]);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keysync.db");

        {
            let store = SqliteBlobStore::open(&path).unwrap();
            store.set_cbor("keysync", "keyrings", &vec!["local", "work"]).await.unwrap();
        }

        let store = SqliteBlobStore::open(&path).unwrap();
        let ids: Option<Vec<String>> = store.get_cbor("keysync", "keyrings").await.unwrap();
        assert_eq!(ids, Some(vec!["local".to_string(), "work".to_string()]));
    }

    mod props {
        use super::*;
        use crate::memory::MemoryBlobStore;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Set(u8, u8, Vec<u8>),
            Remove(u8, u8),
            RemoveNamespace(u8),
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                (0u8..3, 0u8..4, proptest::collection::vec(any::<u8>(), 0..16))
                    .prop_map(|(ns, key, value)| Op::Set(ns, key, value)),
                (0u8..3, 0u8..4).prop_map(|(ns, key)| Op::Remove(ns, key)),
                (0u8..3).prop_map(Op::RemoveNamespace),
            ]
        }

        async fn apply(store: &dyn BlobStore, op: &Op) {
            match op {
                Op::Set(ns, key, value) => store
                    .set(&format!("ns{}", ns), &format!("k{}", key), value)
                    .await
                    .unwrap(),
                Op::Remove(ns, key) => store
                    .remove(&format!("ns{}", ns), &format!("k{}", key))
                    .await
                    .unwrap(),
                Op::RemoveNamespace(ns) => store.remove_namespace(&format!("ns{}", ns)).await.unwrap(),
            }
        }

        proptest! {
            #[test]
            fn sqlite_matches_memory(ops in proptest::collection::vec(op(), 0..24)) {
                let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
                rt.block_on(async {
                    let sqlite = SqliteBlobStore::open_memory().unwrap();
                    let memory = MemoryBlobStore::new();
                    for op in &ops {
                        apply(&sqlite, op).await;
                        apply(&memory, op).await;
                    }
                    for ns in 0..3 {
                        let ns = format!("ns{}", ns);
                        let keys = sqlite.keys(&ns).await.unwrap();
                        assert_eq!(keys, memory.keys(&ns).await.unwrap());
                        for key in &keys {
                            assert_eq!(sqlite.get(&ns, key).await.unwrap(), memory.get(&ns, key).await.unwrap());
                        }
                    }
                });
            }
        }
    }
}
