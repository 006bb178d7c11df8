//! In-memory implementation of the BlobStore trait.
//!
//! Primarily for testing. Same semantics as SQLite, no persistence.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::{Result, StoreError};
use crate::traits::BlobStore;

type Namespaces = BTreeMap<String, BTreeMap<String, Vec<u8>>>;

/// In-memory blob store.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
#[derive(Default)]
pub struct MemoryBlobStore {
    inner: RwLock<Namespaces>,
}

impl MemoryBlobStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored values across namespaces.
    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.values().map(BTreeMap::len).sum())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Namespaces>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Namespaces>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {}", e)))
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let inner = self.read()?;
        Ok(inner.get(namespace).and_then(|ns| ns.get(key)).cloned())
    }

    async fn set(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
        let mut inner = self.write()?;
        inner
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn remove(&self, namespace: &str, key: &str) -> Result<()> {
        let mut inner = self.write()?;
        if let Some(ns) = inner.get_mut(namespace) {
            ns.remove(key);
            if ns.is_empty() {
                inner.remove(namespace);
            }
        }
        Ok(())
    }

    async fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        let inner = self.read()?;
        Ok(inner
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn remove_namespace(&self, namespace: &str) -> Result<()> {
        self.write()?.remove(namespace);
        Ok(())
    }
}
