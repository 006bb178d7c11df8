//! The set of keyrings on this installation.
//!
//! Owned by the application root and passed to whatever needs it; there is
//! no process-wide instance.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use keysync_core::{CryptoProvider, KeyringId};
use keysync_store::{BlobStore, BlobStoreExt};
use keysync_unlock::PasswordCache;

use crate::error::{KeyringError, Result};
use crate::keyring::Keyring;

const REGISTRY_NAMESPACE: &str = "keysync";
const KEYRING_IDS: &str = "keyrings";

/// Registry of keyrings, persisted as a list of ids.
pub struct KeyringRegistry {
    blobs: Arc<dyn BlobStore>,
    crypto: Arc<dyn CryptoProvider>,
    cache: Arc<PasswordCache>,
    local_id: KeyringId,
    keyrings: RwLock<BTreeMap<KeyringId, Arc<Keyring>>>,
}

impl KeyringRegistry {
    /// Load every persisted keyring, creating the local one on first use.
    pub async fn open(
        local_id: KeyringId,
        blobs: Arc<dyn BlobStore>,
        crypto: Arc<dyn CryptoProvider>,
        cache: Arc<PasswordCache>,
    ) -> Result<Self> {
        let registry = Self {
            blobs,
            crypto,
            cache,
            local_id,
            keyrings: RwLock::new(BTreeMap::new()),
        };
        registry.reload().await?;
        Ok(registry)
    }

    /// Re-read all keyrings from the blob store.
    pub async fn reload(&self) -> Result<()> {
        let mut ids: Vec<KeyringId> = self
            .blobs
            .get_cbor(REGISTRY_NAMESPACE, KEYRING_IDS)
            .await?
            .unwrap_or_default();

        let created_local = !ids.contains(&self.local_id);
        if created_local {
            ids.push(self.local_id.clone());
        }

        let mut loaded = BTreeMap::new();
        for id in ids {
            let keyring = self.load(id.clone()).await?;
            loaded.insert(id, Arc::new(keyring));
        }

        let mut keyrings = self.keyrings.write().await;
        if created_local {
            self.persist_ids(&loaded).await?;
            tracing::info!(keyring = %self.local_id, "created local keyring");
        }
        *keyrings = loaded;
        tracing::debug!(keyrings = keyrings.len(), "loaded keyring registry");
        Ok(())
    }

    pub fn local_id(&self) -> &KeyringId {
        &self.local_id
    }

    pub async fn local(&self) -> Result<Arc<Keyring>> {
        self.get(&self.local_id).await
    }

    pub async fn get(&self, id: &KeyringId) -> Result<Arc<Keyring>> {
        self.keyrings
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| KeyringError::KeyringNotFound(id.clone()))
    }

    pub async fn keyring_ids(&self) -> Vec<KeyringId> {
        self.keyrings.read().await.keys().cloned().collect()
    }

    pub async fn create_keyring(&self, id: KeyringId) -> Result<Arc<Keyring>> {
        let mut keyrings = self.keyrings.write().await;
        if keyrings.contains_key(&id) {
            return Err(KeyringError::KeyringExists(id));
        }

        // Stale records of a half-deleted keyring must not resurface.
        self.blobs
            .remove_namespace(&Keyring::namespace_for(&id))
            .await?;
        let keyring = Arc::new(self.load(id.clone()).await?);

        let mut next = keyrings.clone();
        next.insert(id.clone(), Arc::clone(&keyring));
        self.persist_ids(&next).await?;
        *keyrings = next;

        tracing::info!(keyring = %id, "created keyring");
        Ok(keyring)
    }

    /// Delete a keyring with its persisted keys, change log, attributes and
    /// cached passphrases. The local keyring cannot be deleted.
    pub async fn delete_keyring(&self, id: &KeyringId) -> Result<()> {
        if *id == self.local_id {
            return Err(KeyringError::InvalidOperation(
                "the local keyring cannot be deleted".into(),
            ));
        }

        let mut keyrings = self.keyrings.write().await;
        let Some(keyring) = keyrings.get(id) else {
            return Err(KeyringError::KeyringNotFound(id.clone()));
        };
        // Handles held elsewhere must not write into the purged namespace.
        keyring.close().await;

        let mut next = keyrings.clone();
        next.remove(id);
        self.persist_ids(&next).await?;
        *keyrings = next;

        self.blobs
            .remove_namespace(&Keyring::namespace_for(id))
            .await?;
        let evicted = self.cache.evict_keyring(id)?;
        tracing::info!(keyring = %id, evicted, "deleted keyring");
        Ok(())
    }

    async fn load(&self, id: KeyringId) -> Result<Keyring> {
        Keyring::load(
            id,
            Arc::clone(&self.blobs),
            Arc::clone(&self.crypto),
            Arc::clone(&self.cache),
        )
        .await
    }

    async fn persist_ids(&self, keyrings: &BTreeMap<KeyringId, Arc<Keyring>>) -> Result<()> {
        let ids: Vec<&KeyringId> = keyrings.keys().collect();
        self.blobs
            .set_cbor(REGISTRY_NAMESPACE, KEYRING_IDS, &ids)
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for KeyringRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringRegistry")
            .field("local_id", &self.local_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keysync_core::{GenerateOptions, KdfParams, SoftCrypto, UserIdSpec};
    use keysync_store::{MemoryBlobStore, SqliteBlobStore};
    use keysync_unlock::CacheConfig;

    async fn open(blobs: Arc<dyn BlobStore>, cache: Arc<PasswordCache>) -> KeyringRegistry {
        KeyringRegistry::open(
            KeyringId::local(),
            blobs,
            Arc::new(SoftCrypto::with_kdf(KdfParams::testing())),
            cache,
        )
        .await
        .unwrap()
    }

    fn cache() -> Arc<PasswordCache> {
        Arc::new(PasswordCache::new(&CacheConfig::default()))
    }

    #[tokio::test]
    async fn test_local_keyring_created_on_open() {
        let registry = open(Arc::new(MemoryBlobStore::new()), cache()).await;
        assert_eq!(registry.keyring_ids().await, vec![KeyringId::local()]);
        assert!(registry.local().await.is_ok());
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let registry = open(Arc::new(MemoryBlobStore::new()), cache()).await;
        let work = KeyringId::new("work");

        registry.create_keyring(work.clone()).await.unwrap();
        assert!(matches!(
            registry.create_keyring(work.clone()).await,
            Err(KeyringError::KeyringExists(_))
        ));
        assert!(registry.get(&work).await.is_ok());

        registry.delete_keyring(&work).await.unwrap();
        assert!(matches!(registry.get(&work).await, Err(KeyringError::KeyringNotFound(_))));
        assert!(matches!(
            registry.delete_keyring(&work).await,
            Err(KeyringError::KeyringNotFound(_))
        ));
        assert!(matches!(
            registry.delete_keyring(&KeyringId::local()).await,
            Err(KeyringError::InvalidOperation(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_purges_keys_and_cache() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let cache = cache();
        let registry = open(blobs.clone(), cache.clone()).await;
        let work = KeyringId::new("work");
        let keyring = registry.create_keyring(work.clone()).await.unwrap();

        let key = keyring
            .generate(&GenerateOptions {
                user_ids: vec![UserIdSpec::new("W", "w@example.org")],
                ..Default::default()
            })
            .await
            .unwrap();
        cache.set(&work, Arc::new(key), "pw").unwrap();

        registry.delete_keyring(&work).await.unwrap();
        assert!(blobs
            .keys(&Keyring::namespace_for(&work))
            .await
            .unwrap()
            .is_empty());
        assert!(cache.is_empty().unwrap());

        // A new keyring with the same id starts empty
        let again = registry.create_keyring(work).await.unwrap();
        assert!(again.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_deleted_keyring_handle_refuses_writes() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let registry = open(blobs.clone(), cache()).await;
        let work = KeyringId::new("work");
        let held = registry.create_keyring(work.clone()).await.unwrap();

        registry.delete_keyring(&work).await.unwrap();
        let result = held
            .generate(&GenerateOptions {
                user_ids: vec![UserIdSpec::new("W", "w@example.org")],
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(KeyringError::KeyringNotFound(_))));
        assert!(blobs
            .keys(&Keyring::namespace_for(&work))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_registry_persists_in_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keysync.db");
        let work = KeyringId::new("work");
        let fingerprint = {
            let blobs = Arc::new(SqliteBlobStore::open(&path).unwrap());
            let registry = open(blobs, cache()).await;
            let keyring = registry.create_keyring(work.clone()).await.unwrap();
            keyring
                .generate(&GenerateOptions {
                    user_ids: vec![UserIdSpec::new("W", "w@example.org")],
                    ..Default::default()
                })
                .await
                .unwrap()
                .fingerprint()
        };

        let blobs = Arc::new(SqliteBlobStore::open(&path).unwrap());
        let registry = open(blobs, cache()).await;
        assert_eq!(registry.keyring_ids().await, vec![KeyringId::local(), work.clone()]);
        let keyring = registry.get(&work).await.unwrap();
        assert!(keyring.lookup_by_fingerprint(&fingerprint).await.is_some());
    }
}
