//! Unlock coordinator.
//!
//! Resolves "need an unlocked key" requests:
//!
//! ```text
//!   Idle ──unlock──> AwaitingInput ──correct passphrase──> Resolved(Ok)
//!                      │    ^
//!                      │    └──wrong passphrase (re-prompt)
//!                      └──cancel / prompt closed──> Resolved(Cancelled)
//! ```
//!
//! Already decrypted keys, cache hits and inline passwords never reach
//! `AwaitingInput`. At most one request awaits input at a time.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use zeroize::Zeroizing;

use keysync_core::{CryptoError, CryptoProvider, Fingerprint, Key, KeyId, KeyringId};

use crate::cache::PasswordCache;
use crate::error::{Result, UnlockError};

/// Identifier of one password request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

impl RequestId {
    fn generate() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Options for [`UnlockCoordinator::unlock`].
#[derive(Clone)]
pub struct UnlockOptions {
    pub keyring_id: KeyringId,
    /// The private key to unlock.
    pub key: Key,
    /// Shown to the user by the prompt.
    pub reason: String,
    /// Whether the prompt should open itself or wait for the user.
    pub open_prompt: bool,
    /// Per-request caching preference. `None` follows the cache policy.
    pub cache: Option<bool>,
    /// Passphrase supplied by the caller.
    pub password: Option<String>,
}

impl UnlockOptions {
    pub fn new(keyring_id: KeyringId, key: Key) -> Self {
        Self {
            keyring_id,
            key,
            reason: String::new(),
            open_prompt: true,
            cache: None,
            password: None,
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn open_prompt(mut self, open_prompt: bool) -> Self {
        self.open_prompt = open_prompt;
        self
    }

    pub fn cache(mut self, cache: bool) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

impl fmt::Debug for UnlockOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnlockOptions")
            .field("keyring_id", &self.keyring_id)
            .field("key_id", &self.key.key_id())
            .field("reason", &self.reason)
            .field("open_prompt", &self.open_prompt)
            .field("cache", &self.cache)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// What the prompt is told about a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlockContext {
    pub request_id: RequestId,
    pub keyring_id: KeyringId,
    pub key_id: KeyId,
    pub fingerprint: Fingerprint,
    /// Primary user id of the key, `Name <email>`.
    pub user_id: Option<String>,
    pub reason: String,
    pub open_prompt: bool,
    /// Whether the unlocked key will be cached unless the user says otherwise.
    pub cache: bool,
}

/// The password entry surface.
///
/// Implementations answer through [`UnlockCoordinator::submit_password`] and
/// [`UnlockCoordinator::cancel`]. Callbacks must not block.
pub trait PasswordPrompt: Send + Sync {
    /// A new request needs a passphrase.
    fn unlock_requested(&self, context: &UnlockContext);

    /// The last passphrase for `request_id` was wrong; the request stays open.
    fn wrong_password(&self, request_id: RequestId);

    /// The request was resolved or cancelled.
    fn request_closed(&self, request_id: RequestId);
}

/// Observable state of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockPhase {
    Idle,
    AwaitingInput(RequestId),
}

enum Input {
    Password {
        passphrase: Zeroizing<String>,
        remember: Option<bool>,
    },
    Cancel,
}

struct PendingRequest {
    id: RequestId,
    tx: mpsc::UnboundedSender<Input>,
}

/// Clears the pending slot when the waiting call ends, however it ends.
struct RequestGuard<'a> {
    slot: &'a Mutex<Option<PendingRequest>>,
    id: RequestId,
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().map(|p| p.id) == Some(self.id) {
            *slot = None;
        }
    }
}

/// Coordinates key unlocking across the cache, callers and the prompt.
pub struct UnlockCoordinator {
    crypto: Arc<dyn CryptoProvider>,
    cache: Arc<PasswordCache>,
    prompt: Arc<dyn PasswordPrompt>,
    pending: Mutex<Option<PendingRequest>>,
}

impl UnlockCoordinator {
    pub fn new(
        crypto: Arc<dyn CryptoProvider>,
        cache: Arc<PasswordCache>,
        prompt: Arc<dyn PasswordPrompt>,
    ) -> Self {
        Self {
            crypto,
            cache,
            prompt,
            pending: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> &Arc<PasswordCache> {
        &self.cache
    }

    pub fn phase(&self) -> UnlockPhase {
        match self.slot() {
            Ok(slot) => slot
                .as_ref()
                .map_or(UnlockPhase::Idle, |p| UnlockPhase::AwaitingInput(p.id)),
            Err(_) => UnlockPhase::Idle,
        }
    }

    /// Return a decrypted copy of `options.key`.
    ///
    /// Suspends until the prompt delivers a correct passphrase or cancels
    /// when neither the cache nor `options.password` can unlock the key.
    pub async fn unlock(&self, options: UnlockOptions) -> Result<Arc<Key>> {
        let key_id = options.key.key_id();

        if options.key.is_decrypted() {
            return Ok(Arc::new(options.key));
        }
        if !options.key.is_private() {
            return Err(UnlockError::NotPrivate(key_id));
        }

        if let Some(hit) = self.cache.get_for(&options.keyring_id, &options.key)? {
            tracing::debug!(keyring = %options.keyring_id, %key_id, "unlock served from cache");
            return Ok(hit.key());
        }

        if let Some(password) = &options.password {
            let unlocked = Arc::new(self.crypto.decrypt_key(&options.key, password).await?);
            self.store(&options, &unlocked, password, None)?;
            return Ok(unlocked);
        }

        let (id, mut rx) = self.begin_request()?;
        let _guard = RequestGuard {
            slot: &self.pending,
            id,
        };

        let context = UnlockContext {
            request_id: id,
            keyring_id: options.keyring_id.clone(),
            key_id,
            fingerprint: options.key.fingerprint(),
            user_id: options.key.primary_user().map(|u| u.user_id()),
            reason: options.reason.clone(),
            open_prompt: options.open_prompt,
            cache: options.cache.unwrap_or(true) && self.cache.is_enabled(),
        };
        tracing::debug!(request = %id, %key_id, "awaiting passphrase");
        self.prompt.unlock_requested(&context);

        loop {
            let Some(Input::Password {
                passphrase,
                remember,
            }) = rx.recv().await
            else {
                tracing::debug!(request = %id, "unlock cancelled");
                self.prompt.request_closed(id);
                return Err(UnlockError::Cancelled);
            };

            match self.crypto.decrypt_key(&options.key, &passphrase).await {
                Ok(unlocked) => {
                    let unlocked = Arc::new(unlocked);
                    self.prompt.request_closed(id);
                    self.store(&options, &unlocked, &passphrase, remember)?;
                    tracing::debug!(request = %id, %key_id, "key unlocked");
                    return Ok(unlocked);
                }
                Err(CryptoError::WrongPassphrase) => {
                    tracing::debug!(request = %id, "wrong passphrase");
                    self.prompt.wrong_password(id);
                }
                Err(e) => {
                    self.prompt.request_closed(id);
                    return Err(e.into());
                }
            }
        }
    }

    /// Deliver a passphrase for an open request.
    pub fn submit_password(&self, request_id: RequestId, passphrase: &str) -> Result<()> {
        self.send(
            request_id,
            Input::Password {
                passphrase: Zeroizing::new(passphrase.to_string()),
                remember: None,
            },
        )
    }

    /// Deliver a passphrase and set the process-wide caching policy.
    pub fn submit_password_and_cache(
        &self,
        request_id: RequestId,
        passphrase: &str,
        remember: bool,
    ) -> Result<()> {
        self.send(
            request_id,
            Input::Password {
                passphrase: Zeroizing::new(passphrase.to_string()),
                remember: Some(remember),
            },
        )
    }

    /// Cancel an open request. The waiting caller gets [`UnlockError::Cancelled`].
    pub fn cancel(&self, request_id: RequestId) -> Result<()> {
        self.send(request_id, Input::Cancel)
    }

    fn begin_request(&self) -> Result<(RequestId, mpsc::UnboundedReceiver<Input>)> {
        let mut slot = self.slot()?;
        if slot.is_some() {
            return Err(UnlockError::InProgress);
        }
        let id = RequestId::generate();
        let (tx, rx) = mpsc::unbounded_channel();
        *slot = Some(PendingRequest { id, tx });
        Ok((id, rx))
    }

    fn send(&self, request_id: RequestId, input: Input) -> Result<()> {
        let slot = self.slot()?;
        match slot.as_ref() {
            Some(pending) if pending.id == request_id => pending
                .tx
                .send(input)
                .map_err(|_| UnlockError::UnknownRequest(request_id)),
            _ => Err(UnlockError::UnknownRequest(request_id)),
        }
    }

    fn store(
        &self,
        options: &UnlockOptions,
        unlocked: &Arc<Key>,
        passphrase: &str,
        remember: Option<bool>,
    ) -> Result<()> {
        if let Some(remember) = remember {
            self.cache.set_enabled(remember)?;
        }
        if remember.or(options.cache).unwrap_or(true) {
            self.cache
                .set(&options.keyring_id, Arc::clone(unlocked), passphrase)?;
        }
        Ok(())
    }

    fn slot(&self) -> Result<MutexGuard<'_, Option<PendingRequest>>> {
        self.pending
            .lock()
            .map_err(|e| UnlockError::CacheUnavailable(format!("mutex poisoned: {}", e)))
    }
}

impl fmt::Debug for UnlockCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnlockCoordinator")
            .field("phase", &self.phase())
            .field("cache", &self.cache)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use keysync_core::{GenerateOptions, KdfParams, SoftCrypto, UserIdSpec};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Requested(UnlockContext),
        Wrong(RequestId),
        Closed(RequestId),
    }

    struct ChannelPrompt {
        tx: mpsc::UnboundedSender<Event>,
    }

    impl PasswordPrompt for ChannelPrompt {
        fn unlock_requested(&self, context: &UnlockContext) {
            let _ = self.tx.send(Event::Requested(context.clone()));
        }

        fn wrong_password(&self, request_id: RequestId) {
            let _ = self.tx.send(Event::Wrong(request_id));
        }

        fn request_closed(&self, request_id: RequestId) {
            let _ = self.tx.send(Event::Closed(request_id));
        }
    }

    struct Harness {
        coordinator: Arc<UnlockCoordinator>,
        events: mpsc::UnboundedReceiver<Event>,
        key: Key,
    }

    impl Harness {
        async fn next(&mut self) -> Event {
            tokio::time::timeout(Duration::from_secs(10), self.events.recv())
                .await
                .expect("prompt event")
                .expect("prompt channel open")
        }

        async fn requested(&mut self) -> UnlockContext {
            match self.next().await {
                Event::Requested(context) => context,
                other => panic!("expected request, got {:?}", other),
            }
        }
    }

    async fn harness() -> Harness {
        let crypto = Arc::new(SoftCrypto::with_kdf(KdfParams::testing()));
        let key = crypto
            .generate_key_pair(&GenerateOptions {
                user_ids: vec![UserIdSpec::new("Alice", "alice@example.org")],
                passphrase: Some("correct".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let (tx, events) = mpsc::unbounded_channel();
        let coordinator = Arc::new(UnlockCoordinator::new(
            crypto,
            Arc::new(PasswordCache::new(&CacheConfig::default())),
            Arc::new(ChannelPrompt { tx }),
        ));
        Harness {
            coordinator,
            events,
            key,
        }
    }

    fn spawn_unlock(
        h: &Harness,
        options: UnlockOptions,
    ) -> tokio::task::JoinHandle<Result<Arc<Key>>> {
        let coordinator = Arc::clone(&h.coordinator);
        tokio::spawn(async move { coordinator.unlock(options).await })
    }

    #[tokio::test]
    async fn test_inline_password() {
        let h = harness().await;
        let options = UnlockOptions::new(KeyringId::local(), h.key.clone()).password("correct");
        let unlocked = h.coordinator.unlock(options).await.unwrap();
        assert!(unlocked.is_decrypted());
        assert_eq!(h.coordinator.cache().len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_inline_wrong_password_creates_no_request() {
        let mut h = harness().await;
        let options = UnlockOptions::new(KeyringId::local(), h.key.clone()).password("nope");
        let result = h.coordinator.unlock(options).await;
        assert!(matches!(result, Err(UnlockError::WrongPassphrase)));
        assert_eq!(h.coordinator.phase(), UnlockPhase::Idle);
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_decrypted_key_bypasses_cache() {
        let h = harness().await;
        let unlocked = h
            .coordinator
            .unlock(UnlockOptions::new(KeyringId::local(), h.key.clone()).password("correct").cache(false))
            .await
            .unwrap();
        assert!(h.coordinator.cache().is_empty().unwrap());

        let again = h
            .coordinator
            .unlock(UnlockOptions::new(KeyringId::local(), (*unlocked).clone()))
            .await
            .unwrap();
        assert!(again.is_decrypted());
        assert!(h.coordinator.cache().is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_public_key_rejected() {
        let h = harness().await;
        let result = h
            .coordinator
            .unlock(UnlockOptions::new(KeyringId::local(), h.key.to_public()))
            .await;
        assert!(matches!(result, Err(UnlockError::NotPrivate(_))));
    }

    #[tokio::test]
    async fn test_prompt_flow_with_wrong_then_correct() {
        let mut h = harness().await;
        let task = spawn_unlock(
            &h,
            UnlockOptions::new(KeyringId::local(), h.key.clone()).reason("sign"),
        );

        let context = h.requested().await;
        assert_eq!(context.reason, "sign");
        assert_eq!(context.fingerprint, h.key.fingerprint());
        assert_eq!(context.user_id.as_deref(), Some("Alice <alice@example.org>"));
        assert_eq!(h.coordinator.phase(), UnlockPhase::AwaitingInput(context.request_id));

        h.coordinator.submit_password(context.request_id, "wrong").unwrap();
        assert_eq!(h.next().await, Event::Wrong(context.request_id));

        h.coordinator.submit_password(context.request_id, "correct").unwrap();
        assert_eq!(h.next().await, Event::Closed(context.request_id));

        let unlocked = task.await.unwrap().unwrap();
        assert!(unlocked.is_decrypted());
        assert_eq!(h.coordinator.phase(), UnlockPhase::Idle);
    }

    #[tokio::test]
    async fn test_cancel_resolves_cancelled() {
        let mut h = harness().await;
        let task = spawn_unlock(&h, UnlockOptions::new(KeyringId::local(), h.key.clone()));
        let context = h.requested().await;

        h.coordinator.cancel(context.request_id).unwrap();
        assert!(matches!(task.await.unwrap(), Err(UnlockError::Cancelled)));
        assert_eq!(h.next().await, Event::Closed(context.request_id));
        assert!(matches!(
            h.coordinator.cancel(context.request_id),
            Err(UnlockError::UnknownRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_second_request_fails_fast() {
        let mut h = harness().await;
        let task = spawn_unlock(&h, UnlockOptions::new(KeyringId::local(), h.key.clone()));
        let context = h.requested().await;

        let second = h
            .coordinator
            .unlock(UnlockOptions::new(KeyringId::local(), h.key.clone()))
            .await;
        assert!(matches!(second, Err(UnlockError::InProgress)));

        h.coordinator.cancel(context.request_id).unwrap();
        let _ = task.await.unwrap();
    }

    #[tokio::test]
    async fn test_cache_hit_never_prompts() {
        let mut h = harness().await;
        h.coordinator
            .unlock(UnlockOptions::new(KeyringId::local(), h.key.clone()).password("correct"))
            .await
            .unwrap();

        let unlocked = h
            .coordinator
            .unlock(UnlockOptions::new(KeyringId::local(), h.key.clone()))
            .await
            .unwrap();
        assert!(unlocked.is_decrypted());
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_remember_false_disables_policy() {
        let mut h = harness().await;
        let task = spawn_unlock(&h, UnlockOptions::new(KeyringId::local(), h.key.clone()));
        let context = h.requested().await;
        assert!(context.cache);

        h.coordinator
            .submit_password_and_cache(context.request_id, "correct", false)
            .unwrap();
        task.await.unwrap().unwrap();

        assert!(!h.coordinator.cache().is_enabled());
        assert!(h.coordinator.cache().is_empty().unwrap());
    }

    #[test]
    fn test_options_debug_redacts_password() {
        let key = Key {
            primary: keysync_core::KeyMaterial {
                algorithm: keysync_core::Algorithm::Ed25519,
                created: 0,
                expires: None,
                public: vec![1; 32],
            },
            users: Vec::new(),
            subkeys: Vec::new(),
            secret: None,
        };
        let options = UnlockOptions::new(KeyringId::local(), key).password("hunter2");
        assert!(!format!("{:?}", options).contains("hunter2"));
    }
}
