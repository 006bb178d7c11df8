//! Error types for keyring operations.

use keysync_core::{CoreError, CryptoError, Fingerprint, KeyringId};
use keysync_store::StoreError;
use keysync_sync::SyncError;
use keysync_unlock::UnlockError;
use thiserror::Error;

use crate::keystore::ImportRejection;

/// Errors that can occur during keyring operations.
#[derive(Debug, Error)]
pub enum KeyringError {
    /// A key id of the new key clashes with a different stored key.
    #[error("key id collision: {0}")]
    KeyIdCollision(String),

    /// The keyring has no private key to sign and encrypt sync packets.
    #[error("keyring {0} has no primary key")]
    NoPrimaryKey(KeyringId),

    /// A sync packet failed decryption or signature verification.
    #[error("sync packet rejected: {0}")]
    SyncAuthenticity(String),

    #[error("wrong passphrase")]
    WrongPassphrase,

    #[error("unlock cancelled")]
    UnlockCancelled,

    #[error("an unlock request is already in progress")]
    UnlockInProgress,

    /// No recipient resolved to a key that can encrypt.
    #[error("no key found for encryption")]
    NoKeyFoundForEncryption,

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("keyring not found: {0}")]
    KeyringNotFound(KeyringId),

    #[error("keyring already exists: {0}")]
    KeyringExists(KeyringId),

    /// Key generation needs at least one user id.
    #[error("at least one user id is required")]
    InvalidUserIds,

    /// Armored input did not yield a usable key.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Rejected configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid operation.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Persisted data could not be decoded.
    #[error("corrupt data in {namespace}/{key}: {reason}")]
    Corrupt {
        namespace: String,
        key: String,
        reason: String,
    },

    /// Storage error.
    #[error("storage error: {0}")]
    Store(StoreError),

    #[error("crypto error: {0}")]
    Crypto(CryptoError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(SyncError),

    #[error("unlock error: {0}")]
    Unlock(UnlockError),
}

impl KeyringError {
    pub(crate) fn key_not_found(fingerprint: &Fingerprint) -> Self {
        KeyringError::KeyNotFound(fingerprint.to_hex())
    }
}

impl From<ImportRejection> for KeyringError {
    fn from(e: ImportRejection) -> Self {
        match e {
            ImportRejection::KeyIdCollision(msg) => KeyringError::KeyIdCollision(msg),
            other => KeyringError::InvalidKey(other.to_string()),
        }
    }
}

impl From<StoreError> for KeyringError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Corrupt {
                namespace,
                key,
                reason,
            } => KeyringError::Corrupt {
                namespace,
                key,
                reason,
            },
            other => KeyringError::Store(other),
        }
    }
}

impl From<CryptoError> for KeyringError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::WrongPassphrase => KeyringError::WrongPassphrase,
            CryptoError::Core(core) => core.into(),
            other => KeyringError::Crypto(other),
        }
    }
}

impl From<CoreError> for KeyringError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::KeyIdCollision(msg) => KeyringError::KeyIdCollision(msg),
            other => KeyringError::InvalidKey(other.to_string()),
        }
    }
}

impl From<SyncError> for KeyringError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Authenticity(msg) => KeyringError::SyncAuthenticity(msg),
            SyncError::Crypto(crypto) => crypto.into(),
            other => KeyringError::Sync(other),
        }
    }
}

impl From<UnlockError> for KeyringError {
    fn from(e: UnlockError) -> Self {
        match e {
            UnlockError::WrongPassphrase => KeyringError::WrongPassphrase,
            UnlockError::Cancelled => KeyringError::UnlockCancelled,
            UnlockError::InProgress => KeyringError::UnlockInProgress,
            other => KeyringError::Unlock(other),
        }
    }
}

/// Result type for keyring operations.
pub type Result<T> = std::result::Result<T, KeyringError>;
