//! Configuration for the keyring service.

use keysync_core::KeyringId;
use keysync_unlock::CacheConfig;

use crate::error::{KeyringError, Result};

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct KeysyncConfig {
    /// Password cache settings.
    pub cache: CacheConfig,
    /// Id of the keyring created at first open.
    pub local_keyring_id: KeyringId,
}

impl Default for KeysyncConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            local_keyring_id: KeyringId::local(),
        }
    }
}

impl KeysyncConfig {
    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.cache.ttl.is_zero() {
            return Err(KeyringError::InvalidConfig("cache ttl must be positive".into()));
        }
        if self.cache.sweep_interval.is_zero() {
            return Err(KeyringError::InvalidConfig(
                "cache sweep interval must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Filter for [`Keyring::lookup_by_address`](crate::Keyring::lookup_by_address).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressQuery {
    pub include_public: bool,
    pub include_private: bool,
    /// Only keys with a verified primary key and a usable encryption subkey.
    pub require_valid: bool,
}

impl Default for AddressQuery {
    fn default() -> Self {
        Self {
            include_public: true,
            include_private: true,
            require_valid: false,
        }
    }
}

impl AddressQuery {
    /// Valid keys of either variant, as needed to pick encryption recipients.
    pub fn valid() -> Self {
        Self {
            require_valid: true,
            ..Default::default()
        }
    }
}
