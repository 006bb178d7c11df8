//! Error types for the sync module.

use thiserror::Error;

use keysync_core::CryptoError;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The packet failed decryption or signature verification. The whole
    /// packet is rejected.
    #[error("sync packet failed authentication: {0}")]
    Authenticity(String),

    /// The packet authenticated but its payload is not a valid sync payload.
    #[error("malformed sync payload: {0}")]
    MalformedPayload(String),

    /// Commit token does not match the export in progress.
    #[error("sync token {0} does not match the pending export")]
    StaleToken(u64),

    /// Crypto provider failure unrelated to packet authenticity.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
