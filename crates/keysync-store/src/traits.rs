//! BlobStore trait: the abstract interface for persisted keyring data.
//!
//! Values are opaque bytes addressed by `(namespace, key)`. Keyrings layer
//! their own encoding on top via [`BlobStoreExt`].

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Result, StoreError};

/// Async key-value interface for persisted blobs.
///
/// For SQLite, `spawn_blocking` is used internally to avoid blocking the
/// runtime.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read a value.
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a value, replacing any previous one.
    async fn set(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()>;

    /// Remove a value. Removing a missing value is not an error.
    async fn remove(&self, namespace: &str, key: &str) -> Result<()>;

    /// All keys of a namespace, sorted.
    async fn keys(&self, namespace: &str) -> Result<Vec<String>>;

    /// Remove every value of a namespace.
    async fn remove_namespace(&self, namespace: &str) -> Result<()> {
        for key in self.keys(namespace).await? {
            self.remove(namespace, &key).await?;
        }
        Ok(())
    }
}

/// CBOR-typed access on top of any [`BlobStore`].
pub trait BlobStoreExt: BlobStore {
    /// Read and decode a value. Undecodable bytes are [`StoreError::Corrupt`].
    fn get_cbor<T: DeserializeOwned + Send>(
        &self,
        namespace: &str,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<T>>> + Send;

    /// Encode and write a value.
    fn set_cbor<T: Serialize + Sync>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

impl<S: BlobStore + ?Sized> BlobStoreExt for S {
    async fn get_cbor<T: DeserializeOwned + Send>(&self, namespace: &str, key: &str) -> Result<Option<T>> {
        let Some(bytes) = self.get(namespace, key).await? else {
            return Ok(None);
        };
        ciborium::from_reader(bytes.as_slice())
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                namespace: namespace.to_string(),
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    async fn set_cbor<T: Serialize + Sync>(&self, namespace: &str, key: &str, value: &T) -> Result<()> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.set(namespace, key, &buf).await
    }
}
