//! Operations that need unlocked private keys.
//!
//! [`KeyringService`] ties the registry to the unlock coordinator: sync
//! packets are sealed and opened with a keyring's primary key, messages are
//! encrypted, decrypted and signed with keys unlocked on demand.

use std::sync::Arc;

use tokio::task::JoinHandle;

use keysync_core::{
    now_millis, CryptoProvider, DecryptedMessage, Key, KeyId, KeyringId, SignatureVerification,
};
use keysync_store::BlobStore;
use keysync_sync::{open_packet, seal_packet, ExportMode, SyncReport, SyncToken};
use keysync_unlock::{PasswordCache, PasswordPrompt, UnlockCoordinator, UnlockOptions};

use crate::config::KeysyncConfig;
use crate::error::{KeyringError, Result};
use crate::keyring::{Keyring, SyncExport};
use crate::registry::KeyringRegistry;

/// Entry point for keyring operations.
pub struct KeyringService {
    registry: Arc<KeyringRegistry>,
    coordinator: Arc<UnlockCoordinator>,
    crypto: Arc<dyn CryptoProvider>,
    cache: Arc<PasswordCache>,
    sweeper: JoinHandle<()>,
}

impl KeyringService {
    /// Open the registry and start the password cache sweeper.
    ///
    /// Must be called within a Tokio runtime.
    pub async fn open(
        config: KeysyncConfig,
        blobs: Arc<dyn BlobStore>,
        crypto: Arc<dyn CryptoProvider>,
        prompt: Arc<dyn PasswordPrompt>,
    ) -> Result<Self> {
        config.validate()?;
        let cache = Arc::new(PasswordCache::new(&config.cache));
        let registry = Arc::new(
            KeyringRegistry::open(
                config.local_keyring_id.clone(),
                blobs,
                Arc::clone(&crypto),
                Arc::clone(&cache),
            )
            .await?,
        );
        let coordinator = Arc::new(UnlockCoordinator::new(
            Arc::clone(&crypto),
            Arc::clone(&cache),
            prompt,
        ));
        let sweeper = PasswordCache::spawn_sweeper(&cache, config.cache.sweep_interval);

        Ok(Self {
            registry,
            coordinator,
            crypto,
            cache,
            sweeper,
        })
    }

    pub fn registry(&self) -> &Arc<KeyringRegistry> {
        &self.registry
    }

    pub fn coordinator(&self) -> &Arc<UnlockCoordinator> {
        &self.coordinator
    }

    pub fn cache(&self) -> &Arc<PasswordCache> {
        &self.cache
    }

    pub async fn keyring(&self, id: &KeyringId) -> Result<Arc<Keyring>> {
        self.registry.get(id).await
    }

    /// Unlock a key through the cache, an inline password or the prompt.
    pub async fn unlock(&self, options: UnlockOptions) -> Result<Arc<Key>> {
        Ok(self.coordinator.unlock(options).await?)
    }

    /// Evict every cached passphrase. Returns the number of entries removed.
    pub fn logout(&self) -> Result<usize> {
        let evicted = self.cache.evict_all()?;
        tracing::info!(evicted, "logged out");
        Ok(evicted)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sync
    // ─────────────────────────────────────────────────────────────────────────

    /// Build, sign and encrypt a sync packet with the keyring's primary key.
    ///
    /// The exported entries stay pending until [`commit_sync`](Self::commit_sync)
    /// is called with the returned token.
    pub async fn export_sync_packet(&self, keyring_id: &KeyringId, mode: ExportMode) -> Result<SyncExport> {
        let keyring = self.registry.get(keyring_id).await?;
        let key = self.primary_key(&keyring).await?;
        self.export_with(&keyring, mode, key).await
    }

    /// Like [`export_sync_packet`](Self::export_sync_packet) with an explicit
    /// sync key, for keyrings that do not hold it.
    pub async fn export_sync_packet_with_key(
        &self,
        keyring_id: &KeyringId,
        mode: ExportMode,
        key: &Key,
    ) -> Result<SyncExport> {
        let keyring = self.registry.get(keyring_id).await?;
        self.export_with(&keyring, mode, key.clone()).await
    }

    async fn export_with(&self, keyring: &Keyring, mode: ExportMode, key: Key) -> Result<SyncExport> {
        let unlocked = self.unlock_for(keyring.id(), key, "sync").await?;
        let (payload, token) = keyring.begin_export(mode).await?;
        let bytes = seal_packet(self.crypto.as_ref(), &payload, &unlocked).await?;
        tracing::info!(keyring = %keyring.id(), entries = payload.len(), %token, "exported sync packet");
        Ok(SyncExport { bytes, token })
    }

    /// Confirm that an exported packet was stored by the transport.
    pub async fn commit_sync(&self, keyring_id: &KeyringId, token: SyncToken) -> Result<usize> {
        self.registry.get(keyring_id).await?.commit_sync(token).await
    }

    /// Decrypt and verify a packet with the keyring's primary key and merge
    /// it. A packet that fails authentication is discarded as a whole.
    pub async fn import_sync_packet(&self, keyring_id: &KeyringId, bytes: &[u8]) -> Result<SyncReport> {
        let keyring = self.registry.get(keyring_id).await?;
        let key = self.primary_key(&keyring).await?;
        self.import_with(&keyring, bytes, key).await
    }

    /// Like [`import_sync_packet`](Self::import_sync_packet) with an explicit
    /// sync key.
    pub async fn import_sync_packet_with_key(
        &self,
        keyring_id: &KeyringId,
        bytes: &[u8],
        key: &Key,
    ) -> Result<SyncReport> {
        let keyring = self.registry.get(keyring_id).await?;
        self.import_with(&keyring, bytes, key.clone()).await
    }

    async fn import_with(&self, keyring: &Keyring, bytes: &[u8], key: Key) -> Result<SyncReport> {
        let unlocked = self.unlock_for(keyring.id(), key, "sync").await?;
        let payload = match open_packet(self.crypto.as_ref(), bytes, &unlocked).await {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(keyring = %keyring.id(), error = %e, "rejected sync packet");
                return Err(e.into());
            }
        };
        keyring.apply_sync_payload(&payload).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Messages
    // ─────────────────────────────────────────────────────────────────────────

    /// Encrypt to every valid key matching `recipients`, signed with the
    /// primary key when `sign` is set.
    pub async fn encrypt_message(
        &self,
        keyring_id: &KeyringId,
        recipients: &[KeyId],
        data: &[u8],
        sign: bool,
    ) -> Result<Vec<u8>> {
        let keyring = self.registry.get(keyring_id).await?;
        let now = now_millis();

        let mut keys = Vec::new();
        for key_id in recipients {
            let found = keyring.lookup_by_id(key_id).await;
            if found.len() > 1 {
                tracing::warn!(%key_id, matches = found.len(), "ambiguous recipient key id");
            }
            keys.extend(
                found
                    .into_iter()
                    .filter(|k| keyring.is_valid(k, now))
                    .map(|k| k.to_public()),
            );
        }
        if keys.is_empty() {
            return Err(KeyringError::NoKeyFoundForEncryption);
        }

        let signer = if sign {
            let key = self.primary_key(&keyring).await?;
            Some(self.unlock_for(keyring.id(), key, "sign").await?)
        } else {
            None
        };

        Ok(self
            .crypto
            .encrypt(data, &keys, signer.as_deref())
            .await?)
    }

    /// Decrypt with the private key the message is addressed to, unlocking
    /// it if needed, and verify signatures against the keyring's keys.
    pub async fn decrypt_message(&self, keyring_id: &KeyringId, ciphertext: &[u8]) -> Result<DecryptedMessage> {
        let keyring = self.registry.get(keyring_id).await?;
        let recipient_ids = self.crypto.recipient_key_ids(ciphertext)?;

        let mut private = None;
        for key_id in &recipient_ids {
            if let Some(key) = keyring
                .lookup_by_any_id(key_id)
                .await
                .into_iter()
                .find(|k| k.is_private())
            {
                private = Some(key);
                break;
            }
        }
        let Some(key) = private else {
            return Err(KeyringError::KeyNotFound(format!(
                "no private key for recipients {:?}",
                recipient_ids
            )));
        };

        let unlocked = self.unlock_for(keyring.id(), key, "decrypt").await?;
        let verifiers: Vec<Key> = keyring.keys().await.iter().map(Key::to_public).collect();
        Ok(self
            .crypto
            .decrypt(ciphertext, &unlocked, &verifiers)
            .await?)
    }

    /// Detached signature with the keyring's primary key.
    pub async fn sign_message(&self, keyring_id: &KeyringId, data: &[u8]) -> Result<Vec<u8>> {
        let keyring = self.registry.get(keyring_id).await?;
        let key = self.primary_key(&keyring).await?;
        let unlocked = self.unlock_for(keyring.id(), key, "sign").await?;
        Ok(self.crypto.sign(data, &unlocked).await?)
    }

    /// Check a detached signature against the keyring's keys.
    pub async fn verify_message(
        &self,
        keyring_id: &KeyringId,
        data: &[u8],
        signature: &[u8],
    ) -> Result<Vec<SignatureVerification>> {
        let keyring = self.registry.get(keyring_id).await?;
        let keys: Vec<Key> = keyring.keys().await.iter().map(Key::to_public).collect();
        Ok(self.crypto.verify(data, signature, &keys).await?)
    }

    async fn primary_key(&self, keyring: &Keyring) -> Result<Key> {
        keyring
            .primary_key()
            .await
            .ok_or_else(|| KeyringError::NoPrimaryKey(keyring.id().clone()))
    }

    async fn unlock_for(&self, keyring_id: &KeyringId, key: Key, reason: &str) -> Result<Arc<Key>> {
        let options = UnlockOptions::new(keyring_id.clone(), key).reason(reason);
        Ok(self.coordinator.unlock(options).await?)
    }
}

impl Drop for KeyringService {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

impl std::fmt::Debug for KeyringService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringService")
            .field("registry", &self.registry)
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}
