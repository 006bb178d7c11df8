//! Error types for the unlock module.

use thiserror::Error;

use keysync_core::{CryptoError, KeyId};

use crate::coordinator::RequestId;

/// Errors that can occur while unlocking keys.
#[derive(Debug, Error)]
pub enum UnlockError {
    /// The supplied passphrase does not decrypt the key.
    #[error("wrong passphrase")]
    WrongPassphrase,

    /// The password request was cancelled or closed.
    #[error("unlock cancelled")]
    Cancelled,

    /// Another unlock request is awaiting input.
    #[error("an unlock request is already awaiting input")]
    InProgress,

    /// No outstanding request has this id.
    #[error("unknown unlock request {0}")]
    UnknownRequest(RequestId),

    /// The key has no secret material to unlock.
    #[error("key {0} is not a private key")]
    NotPrivate(KeyId),

    /// Internal state is unusable (poisoned lock).
    #[error("password cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Crypto provider failure other than a wrong passphrase.
    #[error("crypto error: {0}")]
    Crypto(CryptoError),
}

impl From<CryptoError> for UnlockError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::WrongPassphrase => UnlockError::WrongPassphrase,
            other => UnlockError::Crypto(other),
        }
    }
}

/// Result type for unlock operations.
pub type Result<T> = std::result::Result<T, UnlockError>;
