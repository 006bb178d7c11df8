//! Test fixtures and helpers.
//!
//! Common setup code for integration tests. Helpers panic on failure.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;

use keysync::{ExportMode, Keyring, KeyringService, KeysyncConfig};
use keysync_core::{GenerateOptions, KdfParams, Key, KeyringId, SoftCrypto, UserIdSpec};
use keysync_store::{BlobStore, MemoryBlobStore, SqliteBlobStore};
use keysync_unlock::{PasswordPrompt, RequestId, UnlockContext};

/// How long [`PromptEvents`] waits before failing a test.
pub const PROMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Crypto provider with cheap key derivation.
pub fn test_crypto() -> Arc<SoftCrypto> {
    Arc::new(SoftCrypto::with_kdf(KdfParams::testing()))
}

/// A fresh SQLite database path inside a temporary directory.
///
/// The directory is removed when the returned guard is dropped.
pub fn temp_db() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("keysync.db");
    (dir, path)
}

// ─────────────────────────────────────────────────────────────────────────────
// Prompt
// ─────────────────────────────────────────────────────────────────────────────

/// A callback received by the password prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptEvent {
    Requested(UnlockContext),
    WrongPassword(RequestId),
    Closed(RequestId),
}

struct ChannelPrompt {
    tx: mpsc::UnboundedSender<PromptEvent>,
}

impl PasswordPrompt for ChannelPrompt {
    fn unlock_requested(&self, context: &UnlockContext) {
        let _ = self.tx.send(PromptEvent::Requested(context.clone()));
    }

    fn wrong_password(&self, request_id: RequestId) {
        let _ = self.tx.send(PromptEvent::WrongPassword(request_id));
    }

    fn request_closed(&self, request_id: RequestId) {
        let _ = self.tx.send(PromptEvent::Closed(request_id));
    }
}

/// Receiving side of the prompt callbacks of one replica.
pub struct PromptEvents {
    rx: mpsc::UnboundedReceiver<PromptEvent>,
}

impl PromptEvents {
    /// A prompt and the stream of its callbacks.
    pub fn channel() -> (Arc<dyn PasswordPrompt>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(ChannelPrompt { tx }), Self { rx })
    }

    /// Wait for the next callback.
    pub async fn next(&mut self) -> PromptEvent {
        tokio::time::timeout(PROMPT_TIMEOUT, self.rx.recv())
            .await
            .expect("prompt event before timeout")
            .expect("prompt channel open")
    }

    /// Wait for the next callback and require it to be a new request.
    pub async fn requested(&mut self) -> UnlockContext {
        match self.next().await {
            PromptEvent::Requested(context) => context,
            other => panic!("expected an unlock request, got {:?}", other),
        }
    }

    /// Wait for a wrong-password notice for `request_id`.
    pub async fn wrong_password(&mut self, request_id: RequestId) {
        assert_eq!(self.next().await, PromptEvent::WrongPassword(request_id));
    }

    /// Wait for `request_id` to be closed.
    pub async fn closed(&mut self, request_id: RequestId) {
        assert_eq!(self.next().await, PromptEvent::Closed(request_id));
    }

    /// A callback that already arrived, if any.
    pub fn try_next(&mut self) -> Option<PromptEvent> {
        self.rx.try_recv().ok()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Replica
// ─────────────────────────────────────────────────────────────────────────────

/// One installation: a service over its own blob store and prompt.
pub struct Replica {
    pub service: KeyringService,
    pub prompt: PromptEvents,
    pub blobs: Arc<dyn BlobStore>,
}

impl Replica {
    pub async fn in_memory() -> Self {
        Self::open(KeysyncConfig::default(), Arc::new(MemoryBlobStore::new())).await
    }

    /// A replica persisted at `path`. Reopening the same path restores it.
    pub async fn sqlite(path: &Path) -> Self {
        let blobs = SqliteBlobStore::open(path).expect("open sqlite store");
        Self::open(KeysyncConfig::default(), Arc::new(blobs)).await
    }

    pub async fn open(config: KeysyncConfig, blobs: Arc<dyn BlobStore>) -> Self {
        let (prompt, events) = PromptEvents::channel();
        let service = KeyringService::open(config, Arc::clone(&blobs), test_crypto(), prompt)
            .await
            .expect("open keyring service");
        Self {
            service,
            prompt: events,
            blobs,
        }
    }

    pub fn local_id(&self) -> KeyringId {
        self.service.registry().local_id().clone()
    }

    pub async fn local(&self) -> Arc<Keyring> {
        self.service.registry().local().await.expect("local keyring")
    }

    /// Generate a key for `email` in the local keyring.
    pub async fn generate(&self, email: &str, passphrase: Option<&str>) -> Key {
        let name = email.split('@').next().unwrap_or(email);
        self.local()
            .await
            .generate(&GenerateOptions {
                user_ids: vec![UserIdSpec::new(name, email)],
                passphrase: passphrase.map(str::to_string),
                ..Default::default()
            })
            .await
            .expect("generate key")
    }

    /// Armored private material of a local key, for handing to another replica.
    pub async fn armored_private(&self, key: &Key) -> String {
        self.local()
            .await
            .export_armored(&key.fingerprint(), true)
            .await
            .expect("export key")
            .private
            .expect("private material")
    }

    /// Armored public material of a local key.
    pub async fn armored_public(&self, key: &Key) -> String {
        self.local()
            .await
            .export_armored(&key.fingerprint(), false)
            .await
            .expect("export key")
            .public
    }

    /// Export pending changes of the local keyring and commit the export.
    ///
    /// Only valid when the sync key needs no passphrase or is cached.
    pub async fn sync_out(&self, mode: ExportMode) -> Vec<u8> {
        let id = self.local_id();
        let export = self
            .service
            .export_sync_packet(&id, mode)
            .await
            .expect("export sync packet");
        self.service
            .commit_sync(&id, export.token)
            .await
            .expect("commit sync");
        export.bytes
    }

    /// Fingerprints and variants of every key in the local keyring, sorted.
    pub async fn key_set(&self) -> Vec<(String, bool)> {
        let mut keys: Vec<(String, bool)> = self
            .local()
            .await
            .keys()
            .await
            .iter()
            .map(|k| (k.fingerprint().to_hex(), k.is_private()))
            .collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replica_starts_with_empty_local_keyring() {
        let replica = Replica::in_memory().await;
        assert!(replica.local_id().is_local());
        assert!(replica.key_set().await.is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_replica_reopens() {
        let (_dir, path) = temp_db();
        let key = {
            let replica = Replica::sqlite(&path).await;
            replica.generate("alice@example.org", None).await
        };

        let replica = Replica::sqlite(&path).await;
        assert_eq!(
            replica.key_set().await,
            vec![(key.fingerprint().to_hex(), true)]
        );
    }
}
