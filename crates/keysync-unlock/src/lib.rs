//! # keysync unlock
//!
//! Password cache and key unlock coordination.
//!
//! ## Overview
//!
//! Private keys are stored with their secret material sealed under a
//! passphrase. Operations that need the secrets (signing a sync packet,
//! decrypting a message) go through the [`UnlockCoordinator`], which
//! resolves a decrypted key from, in order:
//!
//! 1. the key itself, when it is already decrypted
//! 2. the [`PasswordCache`]
//! 3. a passphrase supplied by the caller
//! 4. the user, through a [`PasswordPrompt`]
//!
//! ## Cache
//!
//! The cache is volatile. Entries expire after a TTL, are swept by a
//! background task and are evicted when their key is deleted or on logout.
//! Entries currently handed out to a caller are never swept.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use keysync_unlock::{CacheConfig, PasswordCache, UnlockCoordinator, UnlockOptions};
//!
//! # async fn example(
//! #     crypto: Arc<dyn keysync_core::CryptoProvider>,
//! #     prompt: Arc<dyn keysync_unlock::PasswordPrompt>,
//! #     key: keysync_core::Key,
//! # ) -> keysync_unlock::Result<()> {
//! let cache = Arc::new(PasswordCache::new(&CacheConfig::default()));
//! let coordinator = UnlockCoordinator::new(crypto, cache, prompt);
//!
//! let options = UnlockOptions::new(keysync_core::KeyringId::local(), key).reason("sign");
//! let unlocked = coordinator.unlock(options).await?;
//! assert!(unlocked.is_decrypted());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod coordinator;
pub mod error;

pub use cache::{CacheConfig, CachedKey, PasswordCache};
pub use coordinator::{
    PasswordPrompt, RequestId, UnlockContext, UnlockCoordinator, UnlockOptions, UnlockPhase,
};
pub use error::{Result, UnlockError};
