//! Volatile cache of unlocked keys.
//!
//! Entries are keyed by `(KeyringId, KeyId)` and hold the decrypted key plus
//! the passphrase that unlocked it. Nothing here is ever persisted.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use zeroize::Zeroizing;

use keysync_core::{Key, KeyId, KeyringId};

use crate::error::{Result, UnlockError};

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Password cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Process-wide caching policy.
    pub enabled: bool,
    /// Maximum age of an entry.
    pub ttl: Duration,
    /// How often the background sweeper runs.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// An unlocked key held by the cache.
pub struct CachedKey {
    key: Arc<Key>,
    passphrase: Zeroizing<String>,
    created: Instant,
}

impl CachedKey {
    /// Shared handle to the decrypted key.
    pub fn key(&self) -> Arc<Key> {
        Arc::clone(&self.key)
    }

    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.created) >= ttl
    }
}

impl fmt::Debug for CachedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedKey")
            .field("key_id", &self.key.key_id())
            .field("passphrase", &"<redacted>")
            .field("created", &self.created)
            .finish()
    }
}

type CacheKey = (KeyringId, KeyId);

/// Time-limited cache of unlocked keys.
pub struct PasswordCache {
    entries: Mutex<HashMap<CacheKey, Arc<CachedKey>>>,
    enabled: AtomicBool,
    ttl: Duration,
}

impl PasswordCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            enabled: AtomicBool::new(config.enabled),
            ttl: config.ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Whether the caching policy is on.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Switch the caching policy. Turning it off evicts everything.
    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        let was = self.enabled.swap(enabled, Ordering::SeqCst);
        if was && !enabled {
            let evicted = self.evict_all()?;
            tracing::debug!(evicted, "password caching disabled");
        }
        Ok(())
    }

    /// Look up an unexpired entry.
    ///
    /// The returned handle marks the entry as in use; the sweeper leaves it
    /// alone until the handle is dropped.
    pub fn get(&self, keyring_id: &KeyringId, key_id: &KeyId) -> Result<Option<Arc<CachedKey>>> {
        let mut entries = self.lock()?;
        let cache_key = (keyring_id.clone(), *key_id);
        match entries.get(&cache_key) {
            Some(entry) if entry.is_expired(self.ttl, Instant::now()) => {
                if Arc::strong_count(entry) == 1 {
                    entries.remove(&cache_key);
                    tracing::debug!(keyring = %keyring_id, key_id = %key_id, "expired cache entry evicted");
                }
                Ok(None)
            }
            Some(entry) => Ok(Some(Arc::clone(entry))),
            None => Ok(None),
        }
    }

    /// Look up the entry for `key`.
    ///
    /// An entry under the same short id but for another fingerprint counts
    /// as a miss.
    pub fn get_for(&self, keyring_id: &KeyringId, key: &Key) -> Result<Option<Arc<CachedKey>>> {
        let fingerprint = key.fingerprint();
        Ok(self
            .get(keyring_id, &key.key_id())?
            .filter(|entry| entry.key.fingerprint() == fingerprint))
    }

    /// Store an unlocked key. Does nothing when the policy is off.
    ///
    /// Returns whether the entry was stored.
    pub fn set(&self, keyring_id: &KeyringId, key: Arc<Key>, passphrase: &str) -> Result<bool> {
        if !self.is_enabled() {
            return Ok(false);
        }
        let key_id = key.key_id();
        let entry = Arc::new(CachedKey {
            key,
            passphrase: Zeroizing::new(passphrase.to_string()),
            created: Instant::now(),
        });
        self.lock()?.insert((keyring_id.clone(), key_id), entry);
        tracing::debug!(keyring = %keyring_id, key_id = %key_id, "cached unlocked key");
        Ok(true)
    }

    /// Remove one entry. Returns whether it existed.
    pub fn evict(&self, keyring_id: &KeyringId, key_id: &KeyId) -> Result<bool> {
        let removed = self.lock()?.remove(&(keyring_id.clone(), *key_id)).is_some();
        if removed {
            tracing::debug!(keyring = %keyring_id, key_id = %key_id, "evicted cache entry");
        }
        Ok(removed)
    }

    /// Remove every entry of one keyring.
    pub fn evict_keyring(&self, keyring_id: &KeyringId) -> Result<usize> {
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|(keyring, _), _| keyring != keyring_id);
        Ok(before - entries.len())
    }

    /// Remove every entry.
    pub fn evict_all(&self) -> Result<usize> {
        let mut entries = self.lock()?;
        let count = entries.len();
        entries.clear();
        Ok(count)
    }

    /// Remove entries older than the TTL that nobody is reading.
    pub fn sweep_expired(&self) -> Result<usize> {
        self.sweep_expired_at(Instant::now())
    }

    /// [`sweep_expired`](Self::sweep_expired) against an explicit clock.
    pub fn sweep_expired_at(&self, now: Instant) -> Result<usize> {
        let mut entries = self.lock()?;
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, entry| !entry.is_expired(ttl, now) || Arc::strong_count(entry) > 1);
        Ok(before - entries.len())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `interval` until the
    /// cache is dropped. A zero interval is raised to one millisecond.
    pub fn spawn_sweeper(cache: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(cache);
        let interval = interval.max(MIN_SWEEP_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                match cache.sweep_expired() {
                    Ok(0) => {}
                    Ok(swept) => tracing::debug!(swept, "swept expired cache entries"),
                    Err(e) => tracing::warn!(error = %e, "password cache sweep failed"),
                }
            }
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<CacheKey, Arc<CachedKey>>>> {
        self.entries
            .lock()
            .map_err(|e| UnlockError::CacheUnavailable(format!("mutex poisoned: {}", e)))
    }
}

impl fmt::Debug for PasswordCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.entries.lock().map(|e| e.len()).unwrap_or_default();
        f.debug_struct("PasswordCache")
            .field("entries", &len)
            .field("enabled", &self.is_enabled())
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keysync_core::{Algorithm, KeyMaterial, UserId};

    fn key(seed: u8) -> Arc<Key> {
        Arc::new(Key {
            primary: KeyMaterial {
                algorithm: Algorithm::Ed25519,
                created: 0,
                expires: None,
                public: vec![seed; 32],
            },
            users: vec![UserId::new("Test", "test@example.org")],
            subkeys: Vec::new(),
            secret: None,
        })
    }

    fn config(ttl: Duration) -> CacheConfig {
        CacheConfig {
            ttl,
            ..Default::default()
        }
    }

    #[test]
    fn test_set_get_evict() {
        let cache = PasswordCache::new(&CacheConfig::default());
        let keyring = KeyringId::local();
        let k = key(1);

        assert!(cache.set(&keyring, k.clone(), "secret").unwrap());
        let entry = cache.get(&keyring, &k.key_id()).unwrap().unwrap();
        assert_eq!(entry.passphrase(), "secret");
        assert_eq!(entry.key().fingerprint(), k.fingerprint());

        // Scoped by keyring
        assert!(cache.get(&KeyringId::new("other"), &k.key_id()).unwrap().is_none());

        assert!(cache.evict(&keyring, &k.key_id()).unwrap());
        assert!(cache.get(&keyring, &k.key_id()).unwrap().is_none());
    }

    #[test]
    fn test_get_for_checks_fingerprint() {
        let cache = PasswordCache::new(&CacheConfig::default());
        let keyring = KeyringId::local();
        let (a, b) = (key(1), key(2));
        cache.set(&keyring, a.clone(), "a").unwrap();
        assert!(cache.get_for(&keyring, &a).unwrap().is_some());

        // Another key filed under a's short id
        let entry = Arc::new(CachedKey {
            key: b.clone(),
            passphrase: Zeroizing::new("b".into()),
            created: Instant::now(),
        });
        cache.lock().unwrap().insert((keyring.clone(), a.key_id()), entry);
        assert!(cache.get(&keyring, &a.key_id()).unwrap().is_some());
        assert!(cache.get_for(&keyring, &a).unwrap().is_none());
    }

    #[test]
    fn test_disabled_policy_stores_nothing() {
        let cache = PasswordCache::new(&CacheConfig::default());
        let keyring = KeyringId::local();
        cache.set(&keyring, key(1), "a").unwrap();

        cache.set_enabled(false).unwrap();
        assert!(cache.is_empty().unwrap());
        assert!(!cache.set(&keyring, key(2), "b").unwrap());
        assert!(cache.is_empty().unwrap());
    }

    #[test]
    fn test_sweep_respects_ttl_and_readers() {
        let cache = PasswordCache::new(&config(Duration::from_secs(60)));
        let keyring = KeyringId::local();
        let (a, b) = (key(1), key(2));
        cache.set(&keyring, a.clone(), "a").unwrap();
        cache.set(&keyring, b.clone(), "b").unwrap();

        assert_eq!(cache.sweep_expired().unwrap(), 0);

        let reader = cache.get(&keyring, &a.key_id()).unwrap().unwrap();
        let later = Instant::now() + Duration::from_secs(61);
        assert_eq!(cache.sweep_expired_at(later).unwrap(), 1);
        assert_eq!(cache.len().unwrap(), 1);

        drop(reader);
        assert_eq!(cache.sweep_expired_at(later).unwrap(), 1);
        assert!(cache.is_empty().unwrap());
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let cache = PasswordCache::new(&config(Duration::ZERO));
        let keyring = KeyringId::local();
        let k = key(1);
        cache.set(&keyring, k.clone(), "a").unwrap();
        assert!(cache.get(&keyring, &k.key_id()).unwrap().is_none());
        assert!(cache.is_empty().unwrap());
    }

    #[test]
    fn test_evict_keyring() {
        let cache = PasswordCache::new(&CacheConfig::default());
        let work = KeyringId::new("work");
        cache.set(&KeyringId::local(), key(1), "a").unwrap();
        cache.set(&work, key(2), "b").unwrap();
        cache.set(&work, key(3), "c").unwrap();

        assert_eq!(cache.evict_keyring(&work).unwrap(), 2);
        assert_eq!(cache.len().unwrap(), 1);
    }

    #[test]
    fn test_debug_redacts_passphrase() {
        let cache = PasswordCache::new(&CacheConfig::default());
        let keyring = KeyringId::local();
        let k = key(1);
        cache.set(&keyring, k.clone(), "hunter2").unwrap();
        let entry = cache.get(&keyring, &k.key_id()).unwrap().unwrap();
        let debug = format!("{:?}", entry);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }

    #[tokio::test]
    async fn test_sweeper_stops_when_cache_dropped() {
        let cache = Arc::new(PasswordCache::new(&config(Duration::from_secs(1))));
        let handle = PasswordCache::spawn_sweeper(&cache, Duration::from_millis(10));
        drop(cache);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("sweeper should exit")
            .unwrap();
    }

    #[tokio::test]
    async fn test_sweeper_survives_zero_interval() {
        let cache = Arc::new(PasswordCache::new(&config(Duration::from_millis(20))));
        cache.set(&KeyringId::local(), key(1), "a").unwrap();
        let handle = PasswordCache::spawn_sweeper(&cache, Duration::ZERO);

        tokio::time::timeout(Duration::from_secs(5), async {
            while !cache.is_empty().unwrap() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("expired entry swept");
        assert!(!handle.is_finished());
    }

    #[tokio::test]
    async fn test_sweeper_evicts_expired_entries() {
        let cache = Arc::new(PasswordCache::new(&config(Duration::from_millis(20))));
        cache.set(&KeyringId::local(), key(1), "a").unwrap();
        let _handle = PasswordCache::spawn_sweeper(&cache, Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.is_empty().unwrap());
    }
}
